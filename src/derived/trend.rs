//! Trend direction of a measurement series.
//!
//! The mean of the last three readings is compared to the mean of every
//! reading before them. A change under 5% is stable.

use serde::Serialize;

use super::round1;
use crate::models::{Measurement, MeasurementType};

const RECENT_WINDOW: usize = 3;
const STABLE_THRESHOLD_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Magnitude of the change, one decimal.
    pub change_percent: f64,
}

/// Trend over chronologically ordered values.
///
/// `None` with fewer than four readings or a zero baseline.
pub fn trend(values: &[f64]) -> Option<Trend> {
    if values.len() <= RECENT_WINDOW {
        return None;
    }
    let (earlier, recent) = values.split_at(values.len() - RECENT_WINDOW);
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let baseline = mean(earlier);
    if baseline == 0.0 || !baseline.is_finite() {
        return None;
    }

    let change = (mean(recent) - baseline) / baseline.abs() * 100.0;
    let direction = if change.abs() < STABLE_THRESHOLD_PERCENT {
        TrendDirection::Stable
    } else if change > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };
    Some(Trend {
        direction,
        change_percent: round1(change.abs()),
    })
}

/// Trend of one measurement type. Readings are ordered by `recorded_at`;
/// non-numeric values are ignored.
pub fn measurement_trend(
    measurements: &[Measurement],
    measurement_type: MeasurementType,
) -> Option<Trend> {
    let mut series: Vec<&Measurement> = measurements
        .iter()
        .filter(|m| m.measurement_type == measurement_type)
        .collect();
    series.sort_by_key(|m| m.recorded_at);
    let values: Vec<f64> = series.iter().filter_map(|m| m.value.as_f64()).collect();
    trend(&values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasurementValue;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn small_rise_is_stable() {
        let t = trend(&[100.0, 100.0, 100.0, 103.0, 104.0, 105.0]).unwrap();
        assert_eq!(t.direction, TrendDirection::Stable);
        assert_eq!(t.change_percent, 4.0);
    }

    #[test]
    fn large_rise_is_up() {
        let t = trend(&[100.0, 100.0, 100.0, 110.0, 115.0, 120.0]).unwrap();
        assert_eq!(t.direction, TrendDirection::Up);
        assert_eq!(t.change_percent, 15.0);
    }

    #[test]
    fn fall_is_down() {
        let t = trend(&[120.0, 90.0, 90.0, 90.0]).unwrap();
        assert_eq!(t.direction, TrendDirection::Down);
        assert_eq!(t.change_percent, 25.0);
    }

    #[test]
    fn too_few_readings_or_zero_baseline() {
        assert!(trend(&[1.0, 2.0, 3.0]).is_none());
        assert!(trend(&[0.0, 0.0, 5.0, 5.0, 5.0]).is_none());
    }

    #[test]
    fn measurement_series_is_ordered_by_time() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        // Inserted newest first, as the store holds them.
        let measurements: Vec<Measurement> = [120.0, 115.0, 110.0, 100.0, 100.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Measurement {
                id: format!("m{i}"),
                patient_id: "p1".into(),
                measurement_type: MeasurementType::BloodGlucose,
                value: MeasurementValue::Numeric(*v),
                unit: "mg/dL".into(),
                recorded_at: start - Duration::days(i as i64),
                recorded_by: None,
                notes: None,
                attachments: vec![],
            })
            .collect();

        let t = measurement_trend(&measurements, MeasurementType::BloodGlucose).unwrap();
        assert_eq!(t.direction, TrendDirection::Up);
        assert!(measurement_trend(&measurements, MeasurementType::HeartRate).is_none());
    }
}
