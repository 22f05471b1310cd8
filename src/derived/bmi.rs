use serde::Serialize;

use super::round1;
use crate::models::Patient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    ObeseClassI,
    ObeseClassII,
    ObeseClassIII,
}

impl BmiCategory {
    /// Classify a BMI already rounded to one decimal.
    pub fn from_bmi(bmi: f64) -> Self {
        match bmi {
            b if b < 18.5 => Self::Underweight,
            b if b <= 24.9 => Self::Normal,
            b if b <= 29.9 => Self::Overweight,
            b if b <= 34.9 => Self::ObeseClassI,
            b if b <= 39.9 => Self::ObeseClassII,
            _ => Self::ObeseClassIII,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Underweight => "Underweight",
            Self::Normal => "Normal",
            Self::Overweight => "Overweight",
            Self::ObeseClassI => "Obese Class I",
            Self::ObeseClassII => "Obese Class II",
            Self::ObeseClassIII => "Obese Class III",
        }
    }
}

impl std::fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// BMI rounded to one decimal. `None` unless both inputs are positive.
pub fn calculate_bmi(height_cm: Option<f64>, weight_kg: Option<f64>) -> Option<f64> {
    let (height_cm, weight_kg) = (height_cm?, weight_kg?);
    if !(height_cm > 0.0 && weight_kg > 0.0) {
        return None;
    }
    let height_m = height_cm / 100.0;
    Some(round1(weight_kg / (height_m * height_m)))
}

pub fn patient_bmi(patient: &Patient) -> Option<(f64, BmiCategory)> {
    calculate_bmi(patient.height_cm, patient.weight_kg).map(|bmi| (bmi, BmiCategory::from_bmi(bmi)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_weight_example() {
        let bmi = calculate_bmi(Some(170.0), Some(70.0)).unwrap();
        assert_eq!(bmi, 24.2);
        assert_eq!(BmiCategory::from_bmi(bmi).label(), "Normal");
    }

    #[test]
    fn obese_class_one_example() {
        let bmi = calculate_bmi(Some(170.0), Some(90.0)).unwrap();
        assert_eq!(bmi, 31.1);
        assert_eq!(BmiCategory::from_bmi(bmi).to_string(), "Obese Class I");
    }

    #[test]
    fn missing_or_non_positive_inputs() {
        assert_eq!(calculate_bmi(None, Some(70.0)), None);
        assert_eq!(calculate_bmi(Some(170.0), None), None);
        assert_eq!(calculate_bmi(Some(0.0), Some(70.0)), None);
        assert_eq!(calculate_bmi(Some(170.0), Some(-1.0)), None);
        assert_eq!(calculate_bmi(Some(f64::NAN), Some(70.0)), None);
    }

    #[test]
    fn category_boundaries() {
        assert_eq!(BmiCategory::from_bmi(18.4), BmiCategory::Underweight);
        assert_eq!(BmiCategory::from_bmi(18.5), BmiCategory::Normal);
        assert_eq!(BmiCategory::from_bmi(24.9), BmiCategory::Normal);
        assert_eq!(BmiCategory::from_bmi(25.0), BmiCategory::Overweight);
        assert_eq!(BmiCategory::from_bmi(35.0), BmiCategory::ObeseClassII);
        assert_eq!(BmiCategory::from_bmi(40.0), BmiCategory::ObeseClassIII);
    }
}
