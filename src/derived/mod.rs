//! Pure derived views over store contents. Nothing here holds state.

pub mod activity;
pub mod adherence;
pub mod bmi;
pub mod clinical;
pub mod trend;

pub use activity::{recent_activity, upcoming_appointments, ActivityItem, ActivityKind};
pub use adherence::{adherence_percentage, patient_dose_counts, DoseCounts};
pub use bmi::{calculate_bmi, patient_bmi, BmiCategory};
pub use clinical::{classify, normal_range, ClinicalStatus, NormalRange};
pub use trend::{measurement_trend, trend, Trend, TrendDirection};

/// Round to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
