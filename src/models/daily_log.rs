use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{LogSeverity, LogType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLog {
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub severity: LogSeverity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub follow_up_required: bool,
}

/// Payload for adding a daily log entry. `patient_id` is attached by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLogDraft {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub severity: LogSeverity,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub follow_up_required: bool,
}
