//! Field-name normalization at the gateway boundary.
//!
//! Older rows and some client writes use camelCase column names
//! (`patientId`, `recordedAt`, ...). Rows are rewritten to the canonical
//! snake_case spelling here so the stores only ever see one shape.
//! When both spellings are present the canonical one wins.

use serde_json::{Map, Value};

/// Alternate spelling → canonical column name.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("patientId", "patient_id"),
    ("medicationId", "medication_id"),
    ("appointmentId", "appointment_id"),
    ("userId", "user_id"),
    ("dateOfBirth", "date_of_birth"),
    ("medicalConditions", "medical_conditions"),
    ("heightCm", "height_cm"),
    ("weightKg", "weight_kg"),
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
    ("prescribedBy", "prescribed_by"),
    ("startDate", "start_date"),
    ("endDate", "end_date"),
    ("isActive", "active"),
    ("scheduledTime", "scheduled_time"),
    ("takenAt", "taken_at"),
    ("recordedAt", "recorded_at"),
    ("recordedBy", "recorded_by"),
    ("followUpRequired", "follow_up_required"),
    ("isRead", "read"),
    ("dateTime", "date_time"),
    ("durationMinutes", "duration_minutes"),
    ("pushNotifications", "push_notifications"),
    ("medicationReminders", "medication_reminders"),
    ("appointmentReminders", "appointment_reminders"),
    ("reminderOffsetsMinutes", "reminder_offsets_minutes"),
];

fn canonical_name(key: &str) -> Option<&'static str> {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
}

/// Rewrite a row (recursively, including embedded dose lists) to the
/// canonical field names.
pub fn normalize_record(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_record).collect()),
        other => other,
    }
}

fn normalize_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    let mut aliased = Vec::new();

    for (key, value) in map {
        match canonical_name(&key) {
            Some(canonical) => aliased.push((canonical, normalize_record(value))),
            None => {
                out.insert(key, normalize_record(value));
            }
        }
    }

    for (canonical, value) in aliased {
        out.entry(canonical.to_string()).or_insert(value);
    }
    out
}
