use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Appointment, AppointmentStatus, DailyLog, DoseStatus, Measurement, MeasurementValue,
    Medication,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Measurement,
    DailyLog,
    DoseTaken,
}

/// One row of the recent-activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub kind: ActivityKind,
    /// Id of the measurement, log or dose.
    pub source_id: String,
    pub patient_id: String,
    pub title: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

fn display_value(value: &MeasurementValue, unit: &str) -> String {
    let value = match value {
        MeasurementValue::Numeric(v) => v.to_string(),
        MeasurementValue::Text(t) => t.clone(),
    };
    if unit.is_empty() {
        value
    } else {
        format!("{value} {unit}")
    }
}

/// Measurements, daily logs and taken doses merged newest first.
pub fn recent_activity(
    medications: &[Medication],
    measurements: &[Measurement],
    logs: &[DailyLog],
    limit: usize,
) -> Vec<ActivityItem> {
    let measurement_items = measurements.iter().map(|m| ActivityItem {
        kind: ActivityKind::Measurement,
        source_id: m.id.clone(),
        patient_id: m.patient_id.clone(),
        title: m.measurement_type.as_str().replace('_', " "),
        detail: display_value(&m.value, &m.unit),
        at: m.recorded_at,
    });

    let log_items = logs.iter().map(|l| ActivityItem {
        kind: ActivityKind::DailyLog,
        source_id: l.id.clone(),
        patient_id: l.patient_id.clone(),
        title: l.title.clone(),
        detail: format!("{} ({})", l.log_type, l.severity),
        at: l.timestamp,
    });

    let dose_items = medications.iter().flat_map(|med| {
        med.doses
            .iter()
            .filter(|d| d.status == DoseStatus::Taken)
            .map(move |d| ActivityItem {
                kind: ActivityKind::DoseTaken,
                source_id: d.id.clone(),
                patient_id: med.patient_id.clone(),
                title: med.name.clone(),
                detail: med.dosage.clone(),
                at: d.taken_at.unwrap_or(d.scheduled_time),
            })
    });

    let mut items: Vec<ActivityItem> = measurement_items.chain(log_items).chain(dose_items).collect();
    items.sort_by(|a, b| b.at.cmp(&a.at));
    items.truncate(limit);
    items
}

/// Appointments at or after `now` that are not cancelled, soonest first.
pub fn upcoming_appointments(
    appointments: &[Appointment],
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Appointment> {
    let mut upcoming: Vec<Appointment> = appointments
        .iter()
        .filter(|a| a.date_time >= now && a.status != AppointmentStatus::Cancelled)
        .cloned()
        .collect();
    upcoming.sort_by_key(|a| a.date_time);
    upcoming.truncate(limit);
    upcoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentType, Dose, LogSeverity, LogType, MeasurementType};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn feed_merges_sources_newest_first() {
        let mut taken = Dose::pending("d1", at(2, 8));
        taken.status = DoseStatus::Taken;
        taken.taken_at = Some(at(2, 9));
        let medication = Medication {
            id: "m1".into(),
            patient_id: "p1".into(),
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            form: "tablet".into(),
            frequency: "daily".into(),
            prescribed_by: None,
            start_date: None,
            end_date: None,
            active: true,
            instructions: None,
            doses: vec![taken, Dose::pending("d2", at(3, 8))],
        };
        let measurement = Measurement {
            id: "x1".into(),
            patient_id: "p1".into(),
            measurement_type: MeasurementType::HeartRate,
            value: MeasurementValue::Numeric(72.0),
            unit: "bpm".into(),
            recorded_at: at(3, 7),
            recorded_by: None,
            notes: None,
            attachments: vec![],
        };
        let log = DailyLog {
            id: "l1".into(),
            patient_id: "p1".into(),
            log_type: LogType::Meal,
            severity: LogSeverity::Low,
            title: "Breakfast".into(),
            description: String::new(),
            timestamp: at(1, 8),
            follow_up_required: false,
        };

        let feed = recent_activity(&[medication], &[measurement], &[log], 10);
        let ids: Vec<_> = feed.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["x1", "d1", "l1"]);
        assert_eq!(feed[0].detail, "72 bpm");
        assert_eq!(feed[0].title, "heart rate");
        assert_eq!(feed[2].detail, "meal (low)");

        assert!(recent_activity(&[], &[], &[], 10).is_empty());
    }

    #[test]
    fn upcoming_skips_past_and_cancelled() {
        let appointment = |id: &str, day: u32, status: AppointmentStatus| Appointment {
            id: id.into(),
            patient_id: "p1".into(),
            title: id.into(),
            doctor: None,
            appointment_type: AppointmentType::Checkup,
            date_time: at(day, 10),
            duration_minutes: 30,
            location: None,
            notes: None,
            reminders: vec![],
            status,
        };
        let list = vec![
            appointment("late", 20, AppointmentStatus::Scheduled),
            appointment("past", 1, AppointmentStatus::Scheduled),
            appointment("cancelled", 12, AppointmentStatus::Cancelled),
            appointment("soon", 11, AppointmentStatus::Confirmed),
        ];
        let upcoming = upcoming_appointments(&list, at(10, 0), 5);
        let ids: Vec<_> = upcoming.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["soon", "late"]);
        assert_eq!(upcoming_appointments(&list, at(10, 0), 1).len(), 1);
    }
}
