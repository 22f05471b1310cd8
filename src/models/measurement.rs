use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::MeasurementType;

/// A reading value: numeric for vitals/labs, categorical for some urine
/// results ("negative", "trace", "2+").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Numeric(f64),
    Text(String),
}

impl MeasurementValue {
    /// Numeric view. Text that parses as a number counts as numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for MeasurementValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<&str> for MeasurementValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub measurement_type: MeasurementType,
    pub value: MeasurementValue,
    #[serde(default)]
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub recorded_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Storage paths (see `gateway::storage::attachment_path`).
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Payload for recording a measurement. `patient_id` is attached by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementDraft {
    #[serde(rename = "type")]
    pub measurement_type: MeasurementType,
    pub value: MeasurementValue,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl MeasurementDraft {
    /// Draft with the type's default unit and no notes.
    pub fn new(
        measurement_type: MeasurementType,
        value: impl Into<MeasurementValue>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement_type,
            value: value.into(),
            unit: measurement_type.default_unit().to_string(),
            recorded_at,
            recorded_by: None,
            notes: None,
            attachments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_untagged_on_the_wire() {
        let numeric: MeasurementValue = serde_json::from_str("72.5").unwrap();
        assert_eq!(numeric, MeasurementValue::Numeric(72.5));
        let text: MeasurementValue = serde_json::from_str("\"trace\"").unwrap();
        assert_eq!(text, MeasurementValue::Text("trace".into()));
    }

    #[test]
    fn numeric_text_is_readable_as_number() {
        assert_eq!(MeasurementValue::from(" 6.5 ").as_f64(), Some(6.5));
        assert_eq!(MeasurementValue::from("negative").as_f64(), None);
    }

    #[test]
    fn draft_uses_default_unit() {
        let draft = MeasurementDraft::new(MeasurementType::HeartRate, 70.0, Utc::now());
        assert_eq!(draft.unit, "bpm");
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["type"], "heart_rate");
    }
}
