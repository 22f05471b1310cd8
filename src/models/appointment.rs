use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AppointmentStatus, AppointmentType};

/// Appointments are fetched per patient / per range and are not cached
/// by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub title: String,
    #[serde(default)]
    pub doctor: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    pub date_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Minutes before `date_time` at which to remind.
    #[serde(default)]
    pub reminders: Vec<i64>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub title: String,
    pub doctor: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    pub date_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub location: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub reminders: Vec<i64>,
    pub status: AppointmentStatus,
}
