use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Wire spelling (serde) and `as_str` always agree.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
    Unspecified => "unspecified",
});

str_enum!(DoseStatus {
    Pending => "pending",
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
});

impl DoseStatus {
    /// Whether the dose has left `Pending`.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

str_enum!(MeasurementCategory {
    VitalSigns => "vital_signs",
    Physical => "physical",
    BloodPanel => "blood_panel",
    UrinePanel => "urine_panel",
    Subjective => "subjective",
});

str_enum!(MeasurementType {
    BloodPressureSystolic => "blood_pressure_systolic",
    BloodPressureDiastolic => "blood_pressure_diastolic",
    HeartRate => "heart_rate",
    Temperature => "temperature",
    OxygenSaturation => "oxygen_saturation",
    RespiratoryRate => "respiratory_rate",
    BloodGlucose => "blood_glucose",
    Weight => "weight",
    Height => "height",
    WaistCircumference => "waist_circumference",
    Hemoglobin => "hemoglobin",
    WhiteBloodCells => "white_blood_cells",
    Platelets => "platelets",
    TotalCholesterol => "total_cholesterol",
    Ldl => "ldl",
    Hdl => "hdl",
    Triglycerides => "triglycerides",
    Hba1c => "hba1c",
    Creatinine => "creatinine",
    Sodium => "sodium",
    Potassium => "potassium",
    UrinePh => "urine_ph",
    UrineSpecificGravity => "urine_specific_gravity",
    UrineProtein => "urine_protein",
    UrineGlucose => "urine_glucose",
    UrineKetones => "urine_ketones",
    PainLevel => "pain_level",
    MoodRating => "mood_rating",
    EnergyLevel => "energy_level",
    SleepQuality => "sleep_quality",
    AnxietyLevel => "anxiety_level",
});

impl MeasurementType {
    pub fn category(&self) -> MeasurementCategory {
        use MeasurementType::*;
        match self {
            BloodPressureSystolic | BloodPressureDiastolic | HeartRate | Temperature
            | OxygenSaturation | RespiratoryRate | BloodGlucose => MeasurementCategory::VitalSigns,
            Weight | Height | WaistCircumference => MeasurementCategory::Physical,
            Hemoglobin | WhiteBloodCells | Platelets | TotalCholesterol | Ldl | Hdl
            | Triglycerides | Hba1c | Creatinine | Sodium | Potassium => {
                MeasurementCategory::BloodPanel
            }
            UrinePh | UrineSpecificGravity | UrineProtein | UrineGlucose | UrineKetones => {
                MeasurementCategory::UrinePanel
            }
            PainLevel | MoodRating | EnergyLevel | SleepQuality | AnxietyLevel => {
                MeasurementCategory::Subjective
            }
        }
    }

    /// Default display unit. Categorical and dimensionless types return "".
    pub fn default_unit(&self) -> &'static str {
        use MeasurementType::*;
        match self {
            BloodPressureSystolic | BloodPressureDiastolic => "mmHg",
            HeartRate => "bpm",
            Temperature => "°C",
            OxygenSaturation => "%",
            RespiratoryRate => "breaths/min",
            BloodGlucose => "mg/dL",
            Weight => "kg",
            Height | WaistCircumference => "cm",
            Hemoglobin => "g/dL",
            WhiteBloodCells | Platelets => "10^9/L",
            TotalCholesterol | Ldl | Hdl | Triglycerides | Creatinine => "mg/dL",
            Hba1c => "%",
            Sodium | Potassium => "mmol/L",
            PainLevel | MoodRating | EnergyLevel | SleepQuality | AnxietyLevel => "/10",
            UrinePh | UrineSpecificGravity | UrineProtein | UrineGlucose | UrineKetones => "",
        }
    }
}

str_enum!(LogType {
    Incident => "incident",
    Symptom => "symptom",
    Behavior => "behavior",
    Activity => "activity",
    Meal => "meal",
    Sleep => "sleep",
    Medication => "medication",
    General => "general",
});

str_enum!(LogSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

str_enum!(NotificationType {
    MedicationReminder => "medication_reminder",
    AppointmentReminder => "appointment_reminder",
    CaregiverUpdate => "caregiver_update",
    SystemAlert => "system_alert",
    MeasurementReminder => "measurement_reminder",
});

str_enum!(AppointmentType {
    Checkup => "checkup",
    FollowUp => "follow_up",
    Specialist => "specialist",
    LabWork => "lab_work",
    Imaging => "imaging",
    Therapy => "therapy",
    Other => "other",
});

str_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
    Missed => "missed",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn dose_status_round_trip() {
        for (variant, s) in [
            (DoseStatus::Pending, "pending"),
            (DoseStatus::Taken, "taken"),
            (DoseStatus::Missed, "missed"),
            (DoseStatus::Skipped, "skipped"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(DoseStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn serde_uses_wire_spelling() {
        let json = serde_json::to_string(&MeasurementType::BloodPressureSystolic).unwrap();
        assert_eq!(json, "\"blood_pressure_systolic\"");
        let parsed: NotificationType = serde_json::from_str("\"medication_reminder\"").unwrap();
        assert_eq!(parsed, NotificationType::MedicationReminder);
    }

    #[test]
    fn measurement_categories() {
        assert_eq!(MeasurementType::HeartRate.category(), MeasurementCategory::VitalSigns);
        assert_eq!(MeasurementType::Weight.category(), MeasurementCategory::Physical);
        assert_eq!(MeasurementType::Hba1c.category(), MeasurementCategory::BloodPanel);
        assert_eq!(MeasurementType::UrineProtein.category(), MeasurementCategory::UrinePanel);
        assert_eq!(MeasurementType::MoodRating.category(), MeasurementCategory::Subjective);
    }

    #[test]
    fn only_pending_is_unresolved() {
        assert!(!DoseStatus::Pending.is_resolved());
        assert!(DoseStatus::Taken.is_resolved());
        assert!(DoseStatus::Missed.is_resolved());
        assert!(DoseStatus::Skipped.is_resolved());
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(DoseStatus::from_str("done").is_err());
        assert!(LogSeverity::from_str("").is_err());
        let err = Gender::from_str("x").unwrap_err();
        assert!(err.to_string().contains("Gender"));
    }
}
