use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::DoseStatus;
use super::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub patient_id: String,
    pub name: String,
    pub dosage: String,
    pub form: String,
    pub frequency: String,
    pub prescribed_by: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Ordered by scheduled time as delivered by the backend.
    #[serde(default)]
    pub doses: Vec<Dose>,
}

fn default_active() -> bool {
    true
}

/// A scheduled intake embedded in its medication row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    pub id: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: DoseStatus,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Dose {
    pub fn pending(id: &str, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            scheduled_time,
            status: DoseStatus::Pending,
            taken_at: None,
            notes: None,
        }
    }

    /// Apply a status transition.
    ///
    /// A resolved dose never returns to `Pending`. `taken_at` is stamped
    /// only when the new status is `Taken` and cleared otherwise.
    /// `notes = None` keeps the existing notes.
    pub fn transition(
        &mut self,
        status: DoseStatus,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        if self.status.is_resolved() && !status.is_resolved() {
            return Err(ModelError::InvalidDoseTransition {
                dose_id: self.id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.taken_at = match (self.status, status) {
            (DoseStatus::Taken, DoseStatus::Taken) => self.taken_at.or(Some(now)),
            (_, DoseStatus::Taken) => Some(now),
            _ => None,
        };
        self.status = status;
        if notes.is_some() {
            self.notes = notes;
        }
        Ok(())
    }
}

/// Payload for creating a medication. `patient_id` is attached by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationDraft {
    pub name: String,
    pub dosage: String,
    pub form: String,
    pub frequency: String,
    pub prescribed_by: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
    pub instructions: Option<String>,
    #[serde(default)]
    pub doses: Vec<Dose>,
}

/// Partial update for a medication. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescribed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doses: Option<Vec<Dose>>,
}
