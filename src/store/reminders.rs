//! Medication and appointment reminders.
//!
//! Planning is pure: each reminder becomes a serializable `ReminderJob`
//! with a deterministic UUID v5 key, so the same dose/offset always maps to
//! the same job and a durable scheduler can dedup deliveries by key.
//!
//! `ReminderScheduler` is the in-process executor. It arms one tokio task
//! per job; when a task fires it reads the *current* preferences through
//! the notification store handle and posts the notification. Armed tasks
//! do not survive a restart; re-planning after restart yields the same
//! keys, and keys already delivered in this process are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{NotificationStore, StoreError};
use crate::models::{
    Appointment, AppointmentStatus, Medication, NotificationDraft, NotificationType, Patient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Medication,
    Appointment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderJob {
    /// Stable per (subject, target time, offset).
    pub key: Uuid,
    pub kind: ReminderKind,
    pub fire_at: DateTime<Utc>,
    pub offset_minutes: i64,
    pub draft: NotificationDraft,
}

fn reminder_key(kind: ReminderKind, subject_id: &str, at: DateTime<Utc>, offset: i64) -> Uuid {
    let name = format!(
        "medtrack:reminder:{}:{subject_id}:{}:{offset}",
        match kind {
            ReminderKind::Medication => "medication",
            ReminderKind::Appointment => "appointment",
        },
        at.timestamp()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

fn lead_time(offset_minutes: i64) -> String {
    match offset_minutes {
        0 => "now".to_string(),
        1 => "in 1 minute".to_string(),
        m if m % 1440 == 0 => format!("in {} day(s)", m / 1440),
        m if m % 60 == 0 => format!("in {} hour(s)", m / 60),
        m => format!("in {m} minutes"),
    }
}

/// `at` minus `offset_minutes`, or `None` when the offset is out of range.
fn fire_time(at: DateTime<Utc>, offset_minutes: i64) -> Option<DateTime<Utc>> {
    let fire_at = Duration::try_minutes(offset_minutes).and_then(|d| at.checked_sub_signed(d));
    if fire_at.is_none() {
        tracing::warn!(offset_minutes, "Reminder offset out of range, skipped");
    }
    fire_at
}

/// One job per offset whose fire time is not already past.
pub fn plan_medication_reminders(
    medication: &Medication,
    patient: &Patient,
    dose_time: DateTime<Utc>,
    offsets_minutes: &[i64],
    now: DateTime<Utc>,
) -> Vec<ReminderJob> {
    offsets_minutes
        .iter()
        .copied()
        .filter(|offset| *offset >= 0)
        .filter_map(|offset| {
            let fire_at = fire_time(dose_time, offset)?;
            if fire_at < now {
                return None;
            }
            let mut draft = NotificationDraft::new(
                NotificationType::MedicationReminder,
                "Medication Reminder",
                &format!(
                    "{} should take {} ({}) {}",
                    patient.name,
                    medication.name,
                    medication.dosage,
                    lead_time(offset)
                ),
            );
            draft.patient_id = Some(patient.id.clone());
            draft.medication_id = Some(medication.id.clone());
            Some(ReminderJob {
                key: reminder_key(ReminderKind::Medication, &medication.id, dose_time, offset),
                kind: ReminderKind::Medication,
                fire_at,
                offset_minutes: offset,
                draft,
            })
        })
        .collect()
}

/// Uses the appointment's own reminder offsets, else `default_offsets`.
/// Cancelled and completed appointments get no reminders.
pub fn plan_appointment_reminders(
    appointment: &Appointment,
    patient: &Patient,
    default_offsets: &[i64],
    now: DateTime<Utc>,
) -> Vec<ReminderJob> {
    if matches!(
        appointment.status,
        AppointmentStatus::Cancelled | AppointmentStatus::Completed
    ) {
        return Vec::new();
    }
    let offsets: &[i64] = if appointment.reminders.is_empty() {
        default_offsets
    } else {
        &appointment.reminders
    };

    offsets
        .iter()
        .copied()
        .filter(|offset| *offset >= 0)
        .filter_map(|offset| {
            let fire_at = fire_time(appointment.date_time, offset)?;
            if fire_at < now {
                return None;
            }
            let with_doctor = appointment
                .doctor
                .as_deref()
                .map(|d| format!(" with {d}"))
                .unwrap_or_default();
            let mut draft = NotificationDraft::new(
                NotificationType::AppointmentReminder,
                "Appointment Reminder",
                &format!(
                    "{}: {}{} {}",
                    patient.name,
                    appointment.title,
                    with_doctor,
                    lead_time(offset)
                ),
            );
            draft.patient_id = Some(patient.id.clone());
            draft.appointment_id = Some(appointment.id.clone());
            Some(ReminderJob {
                key: reminder_key(
                    ReminderKind::Appointment,
                    &appointment.id,
                    appointment.date_time,
                    offset,
                ),
                kind: ReminderKind::Appointment,
                fire_at,
                offset_minutes: offset,
                draft,
            })
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// In-process scheduler
// ═══════════════════════════════════════════════════════════

pub struct ReminderScheduler {
    notifications: Arc<NotificationStore>,
    delivered: Arc<Mutex<HashSet<Uuid>>>,
    armed: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ReminderScheduler {
    pub fn new(notifications: Arc<NotificationStore>) -> Self {
        Self {
            notifications,
            delivered: Arc::new(Mutex::new(HashSet::new())),
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Plan and arm reminders for one dose using the current offsets.
    pub fn schedule_medication_reminder(
        &self,
        medication: &Medication,
        patient: &Patient,
        dose_time: DateTime<Utc>,
    ) -> Result<Vec<ReminderJob>, StoreError> {
        let offsets = self.notifications.preferences()?.reminder_offsets_minutes;
        let jobs = plan_medication_reminders(medication, patient, dose_time, &offsets, Utc::now());
        self.arm_all(&jobs)?;
        Ok(jobs)
    }

    pub fn schedule_appointment_reminder(
        &self,
        appointment: &Appointment,
        patient: &Patient,
    ) -> Result<Vec<ReminderJob>, StoreError> {
        let offsets = self.notifications.preferences()?.reminder_offsets_minutes;
        let jobs = plan_appointment_reminders(appointment, patient, &offsets, Utc::now());
        self.arm_all(&jobs)?;
        Ok(jobs)
    }

    fn arm_all(&self, jobs: &[ReminderJob]) -> Result<(), StoreError> {
        for job in jobs {
            self.arm(job.clone())?;
        }
        Ok(())
    }

    /// Arm a task for `job` unless one is pending or it was delivered.
    /// Returns whether a new task was armed.
    pub fn arm(&self, job: ReminderJob) -> Result<bool, StoreError> {
        if self
            .delivered
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .contains(&job.key)
        {
            return Ok(false);
        }
        let mut armed = self.armed.lock().map_err(|_| StoreError::LockPoisoned)?;
        armed.retain(|_, handle| !handle.is_finished());
        if armed.contains_key(&job.key) {
            return Ok(false);
        }

        let delay = (job.fire_at - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!(key = %job.key, delay_secs = delay.as_secs(), "Reminder armed");
        let key = job.key;
        let notifications = Arc::clone(&self.notifications);
        let delivered = Arc::clone(&self.delivered);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            deliver(&notifications, &delivered, job).await;
        });
        armed.insert(key, handle);
        Ok(true)
    }

    /// Number of armed tasks that have not fired yet.
    pub fn pending(&self) -> usize {
        self.armed
            .lock()
            .map(|armed| armed.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Abort every armed task. Delivered keys are kept.
    pub fn cancel_all(&self) {
        if let Ok(mut armed) = self.armed.lock() {
            let count = armed.len();
            for (_, handle) in armed.drain() {
                handle.abort();
            }
            if count > 0 {
                tracing::debug!(count, "Reminders cancelled");
            }
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn deliver(
    notifications: &NotificationStore,
    delivered: &Mutex<HashSet<Uuid>>,
    job: ReminderJob,
) {
    let enabled = match notifications.preferences() {
        Ok(prefs) => match job.kind {
            ReminderKind::Medication => prefs.medication_reminders,
            ReminderKind::Appointment => prefs.appointment_reminders,
        },
        Err(e) => {
            tracing::warn!(key = %job.key, error = %e, "Reminder skipped");
            return;
        }
    };
    if !enabled {
        tracing::debug!(key = %job.key, "Reminder suppressed by preferences");
        return;
    }

    match delivered.lock() {
        Ok(mut keys) => {
            if !keys.insert(job.key) {
                return;
            }
        }
        Err(_) => return,
    }

    if let Err(e) = notifications.add_notification(job.draft).await {
        tracing::warn!(key = %job.key, error = %e, "Reminder delivery failed");
        if let Ok(mut keys) = delivered.lock() {
            keys.remove(&job.key);
        }
    }
}
