use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::NotificationType;
use crate::config::DEFAULT_REMINDER_OFFSETS_MINUTES;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub medication_id: Option<String>,
    #[serde(default)]
    pub appointment_id: Option<String>,
}

/// Payload for creating a notification. `user_id`, `read` and
/// `created_at` are stamped by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub patient_id: Option<String>,
    pub medication_id: Option<String>,
    pub appointment_id: Option<String>,
}

impl NotificationDraft {
    pub fn new(notification_type: NotificationType, title: &str, message: &str) -> Self {
        Self {
            notification_type,
            title: title.to_string(),
            message: message.to_string(),
            patient_id: None,
            medication_id: None,
            appointment_id: None,
        }
    }
}

/// Per-user notification settings (`user_preferences` row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// In-app toast on new notifications.
    #[serde(default = "enabled")]
    pub push_notifications: bool,
    #[serde(default = "enabled")]
    pub medication_reminders: bool,
    #[serde(default = "enabled")]
    pub appointment_reminders: bool,
    /// Minutes before the event at which reminders fire.
    #[serde(default = "default_offsets")]
    pub reminder_offsets_minutes: Vec<i64>,
}

fn enabled() -> bool {
    true
}

fn default_offsets() -> Vec<i64> {
    DEFAULT_REMINDER_OFFSETS_MINUTES.to_vec()
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            push_notifications: true,
            medication_reminders: true,
            appointment_reminders: true,
            reminder_offsets_minutes: default_offsets(),
        }
    }
}
