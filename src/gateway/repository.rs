//! Typed repository over `RemoteGateway`.
//!
//! Encodes payloads, normalizes returned rows and decodes them into
//! `models`. This is the only place raw JSON rows are touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::normalize::normalize_record;
use super::{Collection, GatewayError, ListFilter, RemoteGateway};
use crate::models::{
    Appointment, AppointmentDraft, DailyLog, DailyLogDraft, Measurement, MeasurementDraft,
    Medication, MedicationDraft, MedicationUpdate, Notification, NotificationDraft,
    NotificationPreferences, Patient, PatientDraft, PatientUpdate,
};

// ═══════════════════════════════════════════
// Encoding / decoding helpers
// ═══════════════════════════════════════════

/// Normalize and decode one row.
pub fn decode<T: DeserializeOwned>(collection: Collection, row: Value) -> Result<T, GatewayError> {
    serde_json::from_value(normalize_record(row)).map_err(|e| GatewayError::Decode {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

/// Normalize and decode a list of rows. One malformed row fails the list.
pub fn decode_all<T: DeserializeOwned>(
    collection: Collection,
    rows: Vec<Value>,
) -> Result<Vec<T>, GatewayError> {
    rows.into_iter().map(|row| decode(collection, row)).collect()
}

/// Encode a payload as a JSON object.
pub fn encode<T: Serialize>(collection: Collection, payload: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(payload).map_err(|e| GatewayError::Decode {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

/// Set `key` on an encoded object. Non-objects are returned unchanged.
pub fn with_field(mut row: Value, key: &str, value: impl Into<Value>) -> Value {
    if let Value::Object(map) = &mut row {
        map.insert(key.to_string(), value.into());
    }
    row
}

// ═══════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════

/// Typed access to every collection the stores use.
#[derive(Clone)]
pub struct Repository {
    gateway: Arc<dyn RemoteGateway>,
}

impl Repository {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    async fn list<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &ListFilter,
    ) -> Result<Vec<T>, GatewayError> {
        let rows = self.gateway.list(collection, filter).await?;
        decode_all(collection, rows)
    }

    async fn insert<T: DeserializeOwned>(
        &self,
        collection: Collection,
        row: Value,
    ) -> Result<T, GatewayError> {
        let stored = self.gateway.insert(collection, row).await?;
        decode(collection, stored)
    }

    async fn update<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<T, GatewayError> {
        let stored = self.gateway.update(collection, id, patch).await?;
        decode(collection, stored)
    }

    // ── Patients ─────────────────────────────────────────

    pub async fn fetch_patients(&self) -> Result<Vec<Patient>, GatewayError> {
        self.list(Collection::Patients, &ListFilter::all().oldest_first("created_at"))
            .await
    }

    pub async fn fetch_patient(&self, id: &str) -> Result<Option<Patient>, GatewayError> {
        match self.gateway.get(Collection::Patients, id).await? {
            Some(row) => decode(Collection::Patients, row).map(Some),
            None => Ok(None),
        }
    }

    pub async fn insert_patient(&self, draft: &PatientDraft) -> Result<Patient, GatewayError> {
        let row = encode(Collection::Patients, draft)?;
        self.insert(Collection::Patients, row).await
    }

    pub async fn update_patient(
        &self,
        id: &str,
        update: &PatientUpdate,
    ) -> Result<Patient, GatewayError> {
        let patch = encode(Collection::Patients, update)?;
        self.update(Collection::Patients, id, patch).await
    }

    // ── Medications ──────────────────────────────────────

    pub async fn fetch_patient_medications(
        &self,
        patient_id: &str,
    ) -> Result<Vec<Medication>, GatewayError> {
        self.list(
            Collection::Medications,
            &ListFilter::for_patient(patient_id).oldest_first("start_date"),
        )
        .await
    }

    pub async fn insert_medication(
        &self,
        patient_id: &str,
        draft: &MedicationDraft,
    ) -> Result<Medication, GatewayError> {
        let row = with_field(encode(Collection::Medications, draft)?, "patient_id", patient_id);
        self.insert(Collection::Medications, row).await
    }

    pub async fn update_medication(
        &self,
        id: &str,
        update: &MedicationUpdate,
    ) -> Result<Medication, GatewayError> {
        let patch = encode(Collection::Medications, update)?;
        self.update(Collection::Medications, id, patch).await
    }

    pub async fn delete_medication(&self, id: &str) -> Result<(), GatewayError> {
        self.gateway.delete(Collection::Medications, id).await
    }

    // ── Measurements ─────────────────────────────────────

    pub async fn fetch_patient_measurements(
        &self,
        patient_id: &str,
    ) -> Result<Vec<Measurement>, GatewayError> {
        self.list(
            Collection::Measurements,
            &ListFilter::for_patient(patient_id).newest_first("recorded_at"),
        )
        .await
    }

    /// Measurements of one type in a window, oldest first (trend input).
    pub async fn fetch_measurement_series(
        &self,
        patient_id: &str,
        measurement_type: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Measurement>, GatewayError> {
        let filter = ListFilter::for_patient(patient_id)
            .with_type(measurement_type)
            .between("recorded_at", from, to)
            .oldest_first("recorded_at");
        self.list(Collection::Measurements, &filter).await
    }

    pub async fn insert_measurement(
        &self,
        patient_id: &str,
        draft: &MeasurementDraft,
    ) -> Result<Measurement, GatewayError> {
        let row = with_field(encode(Collection::Measurements, draft)?, "patient_id", patient_id);
        self.insert(Collection::Measurements, row).await
    }

    // ── Daily logs ───────────────────────────────────────

    pub async fn fetch_patient_logs(&self, patient_id: &str) -> Result<Vec<DailyLog>, GatewayError> {
        self.list(
            Collection::DailyLogs,
            &ListFilter::for_patient(patient_id).newest_first("timestamp"),
        )
        .await
    }

    pub async fn insert_daily_log(
        &self,
        patient_id: &str,
        draft: &DailyLogDraft,
    ) -> Result<DailyLog, GatewayError> {
        let row = with_field(encode(Collection::DailyLogs, draft)?, "patient_id", patient_id);
        self.insert(Collection::DailyLogs, row).await
    }

    // ── Notifications ────────────────────────────────────

    pub async fn fetch_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, GatewayError> {
        self.list(
            Collection::Notifications,
            &ListFilter::for_user(user_id).newest_first("created_at").limit(limit),
        )
        .await
    }

    pub async fn insert_notification(
        &self,
        user_id: &str,
        draft: &NotificationDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Notification, GatewayError> {
        let row = encode(Collection::Notifications, draft)?;
        let row = with_field(row, "user_id", user_id);
        let row = with_field(row, "read", false);
        let row = with_field(row, "created_at", created_at.to_rfc3339());
        self.insert(Collection::Notifications, row).await
    }

    pub async fn set_notification_read(
        &self,
        id: &str,
        read: bool,
    ) -> Result<Notification, GatewayError> {
        self.update(Collection::Notifications, id, json!({ "read": read }))
            .await
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), GatewayError> {
        self.gateway.delete(Collection::Notifications, id).await
    }

    // ── Preferences ──────────────────────────────────────

    /// Preferences row keyed by user id; defaults when absent.
    pub async fn fetch_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreferences, GatewayError> {
        match self.gateway.get(Collection::UserPreferences, user_id).await? {
            Some(row) => decode(Collection::UserPreferences, row),
            None => Ok(NotificationPreferences::default()),
        }
    }

    /// Update the preferences row, creating it on first save.
    pub async fn save_preferences(
        &self,
        user_id: &str,
        prefs: &NotificationPreferences,
    ) -> Result<NotificationPreferences, GatewayError> {
        let row = encode(Collection::UserPreferences, prefs)?;
        match self
            .gateway
            .update(Collection::UserPreferences, user_id, row.clone())
            .await
        {
            Ok(stored) => decode(Collection::UserPreferences, stored),
            Err(GatewayError::NotFound { .. }) => {
                let row = with_field(row, "id", user_id);
                self.insert(Collection::UserPreferences, row).await
            }
            Err(e) => Err(e),
        }
    }

    // ── Appointments (not cached by the store) ───────────

    pub async fn fetch_appointments(
        &self,
        patient_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, GatewayError> {
        let filter = ListFilter::for_patient(patient_id)
            .between("date_time", from, to)
            .oldest_first("date_time");
        self.list(Collection::Appointments, &filter).await
    }

    pub async fn insert_appointment(
        &self,
        patient_id: &str,
        draft: &AppointmentDraft,
    ) -> Result<Appointment, GatewayError> {
        let row = with_field(encode(Collection::Appointments, draft)?, "patient_id", patient_id);
        self.insert(Collection::Appointments, row).await
    }

    pub async fn update_appointment(
        &self,
        id: &str,
        patch: Value,
    ) -> Result<Appointment, GatewayError> {
        self.update(Collection::Appointments, id, patch).await
    }

    pub async fn delete_appointment(&self, id: &str) -> Result<(), GatewayError> {
        self.gateway.delete(Collection::Appointments, id).await
    }
}
