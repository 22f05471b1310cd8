//! Per-patient outcome of a bulk load.
//!
//! A failed per-patient fetch does not abort the load; it contributes no
//! records and is listed here so callers can flag degraded data.

use serde::Serialize;

use crate::gateway::Collection;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionFailure {
    pub collection: Collection,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientLoad {
    pub patient_id: String,
    pub patient_name: String,
    pub failures: Vec<CollectionFailure>,
}

impl PatientLoad {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub patients: Vec<PatientLoad>,
}

impl LoadReport {
    /// True when every per-patient fetch succeeded.
    pub fn is_complete(&self) -> bool {
        self.patients.iter().all(PatientLoad::is_complete)
    }

    pub fn degraded(&self) -> impl Iterator<Item = &PatientLoad> {
        self.patients.iter().filter(|p| !p.is_complete())
    }

    pub fn for_patient(&self, patient_id: &str) -> Option<&PatientLoad> {
        self.patients.iter().find(|p| p.patient_id == patient_id)
    }
}
