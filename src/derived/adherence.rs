use serde::Serialize;

use crate::models::{Dose, DoseStatus, Medication};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DoseCounts {
    pub taken: usize,
    pub missed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl DoseCounts {
    pub fn from_doses<'a>(doses: impl IntoIterator<Item = &'a Dose>) -> Self {
        doses.into_iter().fold(Self::default(), |mut counts, dose| {
            match dose.status {
                DoseStatus::Taken => counts.taken += 1,
                DoseStatus::Missed => counts.missed += 1,
                DoseStatus::Skipped => counts.skipped += 1,
                DoseStatus::Pending => counts.pending += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.taken + self.missed + self.skipped + self.pending
    }

    /// `round(taken / total * 100)`; 0 for an empty set.
    pub fn adherence(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (self.taken as f64 / total as f64 * 100.0).round() as u32
    }
}

pub fn adherence_percentage(doses: &[Dose]) -> u32 {
    DoseCounts::from_doses(doses).adherence()
}

/// Dose counts across every medication of one patient.
pub fn patient_dose_counts(medications: &[Medication], patient_id: &str) -> DoseCounts {
    DoseCounts::from_doses(
        medications
            .iter()
            .filter(|m| m.patient_id == patient_id)
            .flat_map(|m| m.doses.iter()),
    )
}
