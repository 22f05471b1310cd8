//! Clinical status banding for measurements.
//!
//! Numeric types have a fixed normal range. Outside it, a value within 15%
//! of the violated bound is `Mild`, anything further is `Severe`.
//! Subjective scales use fixed bands instead, and categorical urine
//! results are banded by keyword.

use serde::Serialize;

use crate::models::{MeasurementType, MeasurementValue};

/// Relative distance past a bound that still counts as mild.
const MILD_MARGIN: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalStatus {
    Normal,
    Mild,
    Severe,
}

impl ClinicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Mild => "mild",
            Self::Severe => "severe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalRange {
    pub low: f64,
    pub high: f64,
}

const fn range(low: f64, high: f64) -> Option<NormalRange> {
    Some(NormalRange { low, high })
}

/// Adult reference range in the type's default unit.
pub fn normal_range(measurement_type: MeasurementType) -> Option<NormalRange> {
    use MeasurementType::*;
    match measurement_type {
        BloodPressureSystolic => range(90.0, 120.0),
        BloodPressureDiastolic => range(60.0, 80.0),
        HeartRate => range(60.0, 100.0),
        Temperature => range(36.1, 37.2),
        OxygenSaturation => range(95.0, 100.0),
        RespiratoryRate => range(12.0, 20.0),
        BloodGlucose => range(70.0, 140.0),
        Hemoglobin => range(12.0, 17.5),
        WhiteBloodCells => range(4.0, 11.0),
        Platelets => range(150.0, 450.0),
        TotalCholesterol => range(0.0, 200.0),
        Ldl => range(0.0, 100.0),
        Hdl => range(40.0, f64::INFINITY),
        Triglycerides => range(0.0, 150.0),
        Hba1c => range(4.0, 5.6),
        Creatinine => range(0.6, 1.3),
        Sodium => range(135.0, 145.0),
        Potassium => range(3.5, 5.0),
        UrinePh => range(4.5, 8.0),
        UrineSpecificGravity => range(1.005, 1.030),
        Weight | Height | WaistCircumference => None,
        UrineProtein | UrineGlucose | UrineKetones => None,
        PainLevel | MoodRating | EnergyLevel | SleepQuality | AnxietyLevel => None,
    }
}

fn band_by_range(value: f64, range: NormalRange) -> ClinicalStatus {
    if value < range.low {
        if value >= range.low * (1.0 - MILD_MARGIN) {
            ClinicalStatus::Mild
        } else {
            ClinicalStatus::Severe
        }
    } else if value > range.high {
        if value <= range.high * (1.0 + MILD_MARGIN) {
            ClinicalStatus::Mild
        } else {
            ClinicalStatus::Severe
        }
    } else {
        ClinicalStatus::Normal
    }
}

/// 0-10 scale where higher is worse.
fn band_higher_worse(value: f64) -> ClinicalStatus {
    match value {
        v if v <= 3.0 => ClinicalStatus::Normal,
        v if v <= 6.0 => ClinicalStatus::Mild,
        _ => ClinicalStatus::Severe,
    }
}

/// 0-10 scale where higher is better.
fn band_higher_better(value: f64) -> ClinicalStatus {
    match value {
        v if v >= 6.0 => ClinicalStatus::Normal,
        v if v >= 4.0 => ClinicalStatus::Mild,
        _ => ClinicalStatus::Severe,
    }
}

fn band_urine_keyword(value: &MeasurementValue) -> ClinicalStatus {
    match value {
        MeasurementValue::Numeric(v) if *v == 0.0 => ClinicalStatus::Normal,
        MeasurementValue::Numeric(_) => ClinicalStatus::Severe,
        MeasurementValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "negative" | "neg" | "normal" | "none" | "-" => ClinicalStatus::Normal,
            "trace" | "+/-" => ClinicalStatus::Mild,
            _ => ClinicalStatus::Severe,
        },
    }
}

/// Band a measurement. `None` for types without a reference (weight,
/// height) or numeric types given an unreadable value.
pub fn classify(
    measurement_type: MeasurementType,
    value: &MeasurementValue,
) -> Option<ClinicalStatus> {
    use MeasurementType::*;
    match measurement_type {
        UrineProtein | UrineGlucose | UrineKetones => Some(band_urine_keyword(value)),
        PainLevel | AnxietyLevel => value.as_f64().map(band_higher_worse),
        MoodRating | EnergyLevel | SleepQuality => value.as_f64().map(band_higher_better),
        other => {
            let range = normal_range(other)?;
            value.as_f64().map(|v| band_by_range(v, range))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(t: MeasurementType, v: f64) -> Option<ClinicalStatus> {
        classify(t, &MeasurementValue::Numeric(v))
    }

    #[test]
    fn heart_rate_bands() {
        assert_eq!(numeric(MeasurementType::HeartRate, 72.0), Some(ClinicalStatus::Normal));
        assert_eq!(numeric(MeasurementType::HeartRate, 110.0), Some(ClinicalStatus::Mild));
        assert_eq!(numeric(MeasurementType::HeartRate, 130.0), Some(ClinicalStatus::Severe));
        assert_eq!(numeric(MeasurementType::HeartRate, 55.0), Some(ClinicalStatus::Mild));
        assert_eq!(numeric(MeasurementType::HeartRate, 40.0), Some(ClinicalStatus::Severe));
    }

    #[test]
    fn pain_is_worse_when_higher() {
        assert_eq!(numeric(MeasurementType::PainLevel, 2.0), Some(ClinicalStatus::Normal));
        assert_eq!(numeric(MeasurementType::PainLevel, 5.0), Some(ClinicalStatus::Mild));
        assert_eq!(numeric(MeasurementType::PainLevel, 8.0), Some(ClinicalStatus::Severe));
    }

    #[test]
    fn mood_is_worse_when_lower() {
        assert_eq!(numeric(MeasurementType::MoodRating, 8.0), Some(ClinicalStatus::Normal));
        assert_eq!(numeric(MeasurementType::MoodRating, 5.0), Some(ClinicalStatus::Mild));
        assert_eq!(numeric(MeasurementType::MoodRating, 2.0), Some(ClinicalStatus::Severe));
    }

    #[test]
    fn urine_keywords() {
        let t = MeasurementType::UrineProtein;
        assert_eq!(classify(t, &"Negative".into()), Some(ClinicalStatus::Normal));
        assert_eq!(classify(t, &"trace".into()), Some(ClinicalStatus::Mild));
        assert_eq!(classify(t, &"2+".into()), Some(ClinicalStatus::Severe));
    }

    #[test]
    fn high_hdl_is_normal() {
        assert_eq!(numeric(MeasurementType::Hdl, 85.0), Some(ClinicalStatus::Normal));
        assert_eq!(numeric(MeasurementType::Hdl, 30.0), Some(ClinicalStatus::Severe));
    }

    #[test]
    fn unbanded_types_and_unreadable_values() {
        assert_eq!(numeric(MeasurementType::Weight, 80.0), None);
        assert_eq!(classify(MeasurementType::HeartRate, &"fast".into()), None);
        assert_eq!(
            classify(MeasurementType::Temperature, &"38.0".into()),
            Some(ClinicalStatus::Mild)
        );
    }
}
