//! Patient-scoped entity cache.
//!
//! Holds patients, medications (with embedded doses), measurements and
//! daily logs for the signed-in user. Writes go to the backend first and
//! are merged into memory only on success; the one exception is
//! `mark_dose`, which is local until `sync_medication_doses` pushes it.
//!
//! Completions are applied one at a time under the write lock, so two
//! in-flight edits of the same record resolve to whichever lands last.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Local, TimeZone, Utc};
use futures::future::join_all;
use serde::Serialize;

use super::load_report::{CollectionFailure, LoadReport, PatientLoad};
use super::{Generation, StoreError};
use crate::gateway::{Collection, GatewayError, Repository, UserIdentity};
use crate::models::{
    DailyLog, DailyLogDraft, Dose, DoseStatus, Measurement, MeasurementDraft, Medication,
    MedicationDraft, MedicationUpdate, Patient, PatientDraft, PatientUpdate,
};

// ═══════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    pub patients: Vec<Patient>,
    /// Always a clone of an element of `patients` when set.
    pub selected_patient: Option<Patient>,
    pub medications: Vec<Medication>,
    /// Newest first.
    pub measurements: Vec<Measurement>,
    /// Newest first.
    pub daily_logs: Vec<DailyLog>,
    pub loading: bool,
    /// Last error, cleared by the next mutation or a successful load.
    pub error: Option<String>,
    pub load_report: LoadReport,
}

/// A dose scheduled today, decorated for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodayDose {
    pub medication_id: String,
    pub medication_name: String,
    pub dosage: String,
    pub patient_id: String,
    /// `None` when the owning patient is not in the store.
    pub patient_name: Option<String>,
    pub dose: Dose,
}

/// Records fetched for one patient during a bulk load.
struct PatientBundle {
    medications: Vec<Medication>,
    measurements: Vec<Measurement>,
    daily_logs: Vec<DailyLog>,
    load: PatientLoad,
}

fn replace_or_push<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> &str) {
    match items.iter().position(|existing| id(existing) == id(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

/// Substitute an empty list for a failed per-patient fetch and note it.
fn recover<T>(
    patient_id: &str,
    collection: Collection,
    result: Result<Vec<T>, GatewayError>,
    failures: &mut Vec<CollectionFailure>,
) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(patient_id, %collection, error = %e, "Per-patient fetch failed");
        failures.push(CollectionFailure {
            collection,
            message: e.to_string(),
        });
        Vec::new()
    })
}

// ═══════════════════════════════════════════════════════════
// EntityStore
// ═══════════════════════════════════════════════════════════

pub struct EntityStore {
    repository: Repository,
    state: RwLock<EntityState>,
    generation: Generation,
}

impl EntityStore {
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            state: RwLock::new(EntityState::default()),
            generation: Generation::default(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EntityState>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EntityState>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Clear the previous error and capture the generation for a mutation.
    fn begin(&self) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        state.error = None;
        Ok(self.generation.current())
    }

    /// Apply a completion unless the store was reset since `generation`.
    fn commit<T>(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut EntityState) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.write()?;
        if !self.generation.is_current(generation) {
            tracing::debug!("Discarding completion from a previous session");
            return Err(StoreError::Stale);
        }
        Ok(apply(&mut state))
    }

    /// Record a failure in the store-wide error field and hand it back.
    fn fail(&self, generation: u64, operation: &str, err: impl Into<StoreError>) -> StoreError {
        let err = err.into();
        tracing::warn!(operation, error = %err, "Entity store operation failed");
        if let Ok(mut state) = self.state.write() {
            if self.generation.is_current(generation) {
                state.error = Some(err.to_string());
            }
        }
        err
    }

    fn settle<T>(
        &self,
        generation: u64,
        operation: &str,
        result: Result<T, GatewayError>,
    ) -> Result<T, StoreError> {
        result.map_err(|e| self.fail(generation, operation, e))
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Replace the store contents with a fresh bulk load for `user`.
    ///
    /// Per-patient fetches run concurrently; a failed one contributes no
    /// records and is listed in the returned report. Only a failure to
    /// fetch the patient list itself fails the load.
    pub async fn load_all(&self, user: &UserIdentity) -> Result<LoadReport, StoreError> {
        let generation = {
            let mut state = self.write()?;
            state.loading = true;
            state.error = None;
            self.generation.current()
        };
        tracing::info!(user_id = %user.id, "Loading patient data");

        let patients = match self.repository.fetch_patients().await {
            Ok(patients) => patients,
            Err(e) => {
                let err = self.fail(generation, "load_all", e);
                let _ = self.commit(generation, |state| state.loading = false);
                return Err(err);
            }
        };

        let bundles = join_all(patients.iter().map(|p| self.load_patient(p))).await;

        let mut medications = Vec::new();
        let mut measurements = Vec::new();
        let mut daily_logs = Vec::new();
        let mut report = LoadReport::default();
        for bundle in bundles {
            medications.extend(bundle.medications);
            measurements.extend(bundle.measurements);
            daily_logs.extend(bundle.daily_logs);
            report.patients.push(bundle.load);
        }
        measurements.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        daily_logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if !report.is_complete() {
            tracing::warn!(
                degraded = report.degraded().count(),
                "Patient data loaded with per-patient failures"
            );
        }
        tracing::info!(
            patients = patients.len(),
            medications = medications.len(),
            measurements = measurements.len(),
            daily_logs = daily_logs.len(),
            "Patient data loaded"
        );

        let loaded_report = report.clone();
        self.commit(generation, move |state| {
            state.selected_patient = state
                .selected_patient
                .as_ref()
                .and_then(|selected| patients.iter().find(|p| p.id == selected.id).cloned());
            state.patients = patients;
            state.medications = medications;
            state.measurements = measurements;
            state.daily_logs = daily_logs;
            state.load_report = loaded_report;
            state.loading = false;
            state.error = None;
        })?;
        Ok(report)
    }

    async fn load_patient(&self, patient: &Patient) -> PatientBundle {
        let (medications, measurements, daily_logs) = tokio::join!(
            self.repository.fetch_patient_medications(&patient.id),
            self.repository.fetch_patient_measurements(&patient.id),
            self.repository.fetch_patient_logs(&patient.id),
        );

        let mut failures = Vec::new();
        let medications = recover(&patient.id, Collection::Medications, medications, &mut failures);
        let measurements =
            recover(&patient.id, Collection::Measurements, measurements, &mut failures);
        let daily_logs = recover(&patient.id, Collection::DailyLogs, daily_logs, &mut failures);

        PatientBundle {
            medications,
            measurements,
            daily_logs,
            load: PatientLoad {
                patient_id: patient.id.clone(),
                patient_name: patient.name.clone(),
                failures,
            },
        }
    }

    /// Drop everything and invalidate in-flight requests.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        self.generation.advance();
        *state = EntityState::default();
        tracing::debug!("Entity store reset");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<EntityState, StoreError> {
        Ok(self.read()?.clone())
    }

    pub fn error(&self) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.error.clone())
    }

    pub fn is_loading(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.loading)
    }

    // ── Patients ────────────────────────────────────────────

    /// Select by id. An unknown id clears the selection.
    pub fn select_patient(&self, patient_id: &str) -> Result<Option<Patient>, StoreError> {
        let mut state = self.write()?;
        let selected = state.patients.iter().find(|p| p.id == patient_id).cloned();
        state.selected_patient = selected.clone();
        Ok(selected)
    }

    pub fn selected_patient(&self) -> Result<Option<Patient>, StoreError> {
        Ok(self.read()?.selected_patient.clone())
    }

    pub fn patient(&self, patient_id: &str) -> Result<Option<Patient>, StoreError> {
        Ok(self.read()?.patients.iter().find(|p| p.id == patient_id).cloned())
    }

    pub async fn add_patient(&self, draft: &PatientDraft) -> Result<Patient, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.insert_patient(draft).await;
        let patient = self.settle(generation, "add_patient", result)?;
        self.commit(generation, |state| state.patients.push(patient.clone()))?;
        tracing::info!(patient_id = %patient.id, "Patient added");
        Ok(patient)
    }

    /// Merge the stored record; a selected patient is refreshed in place.
    pub async fn update_patient(
        &self,
        patient_id: &str,
        update: &PatientUpdate,
    ) -> Result<Patient, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.update_patient(patient_id, update).await;
        let patient = self.settle(generation, "update_patient", result)?;
        self.commit(generation, |state| {
            replace_or_push(&mut state.patients, patient.clone(), |p| p.id.as_str());
            if state
                .selected_patient
                .as_ref()
                .is_some_and(|selected| selected.id == patient.id)
            {
                state.selected_patient = Some(patient.clone());
            }
        })?;
        Ok(patient)
    }

    // ── Medications ─────────────────────────────────────────

    pub async fn add_medication(
        &self,
        patient_id: &str,
        draft: &MedicationDraft,
    ) -> Result<Medication, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.insert_medication(patient_id, draft).await;
        let medication = self.settle(generation, "add_medication", result)?;
        self.commit(generation, |state| state.medications.push(medication.clone()))?;
        tracing::info!(medication_id = %medication.id, patient_id, "Medication added");
        Ok(medication)
    }

    pub async fn update_medication(
        &self,
        medication_id: &str,
        update: &MedicationUpdate,
    ) -> Result<Medication, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.update_medication(medication_id, update).await;
        let medication = self.settle(generation, "update_medication", result)?;
        self.commit(generation, |state| {
            replace_or_push(&mut state.medications, medication.clone(), |m| m.id.as_str())
        })?;
        Ok(medication)
    }

    pub async fn delete_medication(&self, medication_id: &str) -> Result<(), StoreError> {
        let generation = self.begin()?;
        let result = self.repository.delete_medication(medication_id).await;
        self.settle(generation, "delete_medication", result)?;
        self.commit(generation, |state| {
            state.medications.retain(|m| m.id != medication_id)
        })?;
        tracing::info!(medication_id, "Medication deleted");
        Ok(())
    }

    /// Local-only dose transition. Not sent to the backend until
    /// `sync_medication_doses` is called for the medication.
    pub fn mark_dose(
        &self,
        medication_id: &str,
        dose_id: &str,
        status: DoseStatus,
        notes: Option<String>,
    ) -> Result<Dose, StoreError> {
        let mut state = self.write()?;
        state.error = None;
        let result = transition_dose(&mut state, medication_id, dose_id, status, notes);
        if let Err(e) = &result {
            tracing::warn!(medication_id, dose_id, error = %e, "Dose transition rejected");
            state.error = Some(e.to_string());
        }
        result
    }

    /// Write the medication's local dose list through to the backend.
    pub async fn sync_medication_doses(&self, medication_id: &str) -> Result<Medication, StoreError> {
        let generation = self.begin()?;
        let doses = self
            .read()?
            .medications
            .iter()
            .find(|m| m.id == medication_id)
            .map(|m| m.doses.clone());
        let Some(doses) = doses else {
            return Err(self.fail(
                generation,
                "sync_medication_doses",
                StoreError::NotFound {
                    entity: "Medication",
                    id: medication_id.to_string(),
                },
            ));
        };

        let update = MedicationUpdate {
            doses: Some(doses),
            ..Default::default()
        };
        let result = self.repository.update_medication(medication_id, &update).await;
        let medication = self.settle(generation, "sync_medication_doses", result)?;
        self.commit(generation, |state| {
            replace_or_push(&mut state.medications, medication.clone(), |m| m.id.as_str())
        })?;
        tracing::debug!(medication_id, doses = medication.doses.len(), "Doses synced");
        Ok(medication)
    }

    // ── Measurements and logs (append-only) ─────────────────

    pub async fn add_measurement(
        &self,
        patient_id: &str,
        draft: &MeasurementDraft,
    ) -> Result<Measurement, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.insert_measurement(patient_id, draft).await;
        let measurement = self.settle(generation, "add_measurement", result)?;
        self.commit(generation, |state| {
            let at = state
                .measurements
                .iter()
                .position(|m| m.recorded_at <= measurement.recorded_at)
                .unwrap_or(state.measurements.len());
            state.measurements.insert(at, measurement.clone());
        })?;
        Ok(measurement)
    }

    pub async fn add_daily_log(
        &self,
        patient_id: &str,
        draft: &DailyLogDraft,
    ) -> Result<DailyLog, StoreError> {
        let generation = self.begin()?;
        let result = self.repository.insert_daily_log(patient_id, draft).await;
        let log = self.settle(generation, "add_daily_log", result)?;
        self.commit(generation, |state| {
            let at = state
                .daily_logs
                .iter()
                .position(|l| l.timestamp <= log.timestamp)
                .unwrap_or(state.daily_logs.len());
            state.daily_logs.insert(at, log.clone());
        })?;
        Ok(log)
    }

    // ── Queries ─────────────────────────────────────────────

    pub fn patient_medications(&self, patient_id: &str) -> Result<Vec<Medication>, StoreError> {
        let state = self.read()?;
        Ok(state
            .medications
            .iter()
            .filter(|m| m.patient_id == patient_id)
            .cloned()
            .collect())
    }

    pub fn patient_measurements(&self, patient_id: &str) -> Result<Vec<Measurement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .measurements
            .iter()
            .filter(|m| m.patient_id == patient_id)
            .cloned()
            .collect())
    }

    pub fn patient_logs(&self, patient_id: &str) -> Result<Vec<DailyLog>, StoreError> {
        let state = self.read()?;
        Ok(state
            .daily_logs
            .iter()
            .filter(|l| l.patient_id == patient_id)
            .cloned()
            .collect())
    }

    /// Doses scheduled on today's local calendar date.
    pub fn todays_doses(&self) -> Result<Vec<TodayDose>, StoreError> {
        self.todays_doses_at(&Local::now())
    }

    /// Doses whose scheduled time falls on `now`'s calendar date in `now`'s
    /// timezone, soonest first. Inactive medications are included.
    pub fn todays_doses_at<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<Vec<TodayDose>, StoreError> {
        let state = self.read()?;
        let tz = now.timezone();
        let today = now.date_naive();

        let mut doses = Vec::new();
        for medication in &state.medications {
            let patient_name = state
                .patients
                .iter()
                .find(|p| p.id == medication.patient_id)
                .map(|p| p.name.clone());
            for dose in &medication.doses {
                if dose.scheduled_time.with_timezone(&tz).date_naive() != today {
                    continue;
                }
                doses.push(TodayDose {
                    medication_id: medication.id.clone(),
                    medication_name: medication.name.clone(),
                    dosage: medication.dosage.clone(),
                    patient_id: medication.patient_id.clone(),
                    patient_name: patient_name.clone(),
                    dose: dose.clone(),
                });
            }
        }
        doses.sort_by_key(|d| d.dose.scheduled_time);
        Ok(doses)
    }
}

fn transition_dose(
    state: &mut EntityState,
    medication_id: &str,
    dose_id: &str,
    status: DoseStatus,
    notes: Option<String>,
) -> Result<Dose, StoreError> {
    let medication = state
        .medications
        .iter_mut()
        .find(|m| m.id == medication_id)
        .ok_or_else(|| StoreError::NotFound {
            entity: "Medication",
            id: medication_id.to_string(),
        })?;
    let dose = medication
        .doses
        .iter_mut()
        .find(|d| d.id == dose_id)
        .ok_or_else(|| StoreError::NotFound {
            entity: "Dose",
            id: dose_id.to_string(),
        })?;
    dose.transition(status, notes, Utc::now())?;
    Ok(dose.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::Operation;
    use crate::gateway::{InMemoryGateway, ListFilter, RemoteGateway};
    use crate::models::{Gender, MeasurementType};
    use async_trait::async_trait;
    use chrono::FixedOffset;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    fn user() -> UserIdentity {
        UserIdentity {
            id: "u1".into(),
            email: None,
        }
    }

    fn patient_row(id: &str, name: &str, created: &str) -> Value {
        json!({
            "id": id, "name": name, "date_of_birth": "1950-04-02",
            "gender": "female", "medical_conditions": [], "caregivers": ["u1"],
            "created_at": created
        })
    }

    fn medication_row(id: &str, patient_id: &str, active: bool, doses: Value) -> Value {
        json!({
            "id": id, "patient_id": patient_id, "name": format!("Med {id}"),
            "dosage": "10mg", "form": "tablet", "frequency": "daily",
            "prescribed_by": null, "start_date": "2026-01-01", "end_date": null,
            "active": active, "doses": doses
        })
    }

    fn seeded() -> (Arc<InMemoryGateway>, EntityStore) {
        let gateway = Arc::new(InMemoryGateway::signed_in("u1"));
        gateway.seed(Collection::Patients, patient_row("p1", "Ana", "2026-01-01T00:00:00Z"));
        gateway.seed(Collection::Patients, patient_row("p2", "Ben", "2026-01-02T00:00:00Z"));
        gateway.seed(
            Collection::Medications,
            medication_row(
                "m1",
                "p1",
                true,
                json!([{ "id": "d1", "scheduled_time": "2026-03-01T08:00:00Z", "status": "pending" }]),
            ),
        );
        gateway.seed(
            Collection::Measurements,
            json!({
                "id": "x1", "patient_id": "p2", "type": "heart_rate", "value": 72,
                "unit": "bpm", "recordedAt": "2026-02-01T09:00:00Z"
            }),
        );
        let store = EntityStore::new(Repository::new(gateway.clone()));
        (gateway, store)
    }

    fn medication_draft(name: &str) -> MedicationDraft {
        MedicationDraft {
            name: name.into(),
            dosage: "5mg".into(),
            form: "tablet".into(),
            frequency: "daily".into(),
            prescribed_by: None,
            start_date: None,
            end_date: None,
            active: true,
            instructions: None,
            doses: vec![],
        }
    }

    #[tokio::test]
    async fn load_all_populates_every_collection() {
        let (_, store) = seeded();
        let report = store.load_all(&user()).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.patients.len(), 2);
        let state = store.snapshot().unwrap();
        assert_eq!(state.patients.len(), 2);
        assert_eq!(state.medications.len(), 1);
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(store.patient_measurements("p2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn per_patient_failure_degrades_to_empty_and_is_reported() {
        let (gateway, store) = seeded();
        gateway.fail_list_for_patient(Collection::Measurements, "p2");

        let report = store.load_all(&user()).await.unwrap();

        assert!(store.patient_measurements("p2").unwrap().is_empty());
        assert_eq!(store.patient_medications("p1").unwrap().len(), 1);
        assert!(store.error().unwrap().is_none());
        let degraded: Vec<_> = report.degraded().collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].patient_id, "p2");
        assert_eq!(degraded[0].failures[0].collection, Collection::Measurements);
    }

    #[tokio::test]
    async fn failed_patient_fetch_sets_error_and_stops_loading() {
        let (gateway, store) = seeded();
        gateway.fail(
            Collection::Patients,
            Operation::List,
            GatewayError::Network("offline".into()),
        );

        let err = store.load_all(&user()).await.unwrap_err();
        assert_eq!(err, StoreError::Gateway(GatewayError::Network("offline".into())));
        let state = store.snapshot().unwrap();
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Network error: offline"));
    }

    #[tokio::test]
    async fn select_known_and_unknown_patient() {
        let (_, store) = seeded();
        store.load_all(&user()).await.unwrap();

        let selected = store.select_patient("p2").unwrap().unwrap();
        assert_eq!(selected.id, "p2");
        assert_eq!(store.selected_patient().unwrap().unwrap().name, "Ben");

        assert!(store.select_patient("nope").unwrap().is_none());
        assert!(store.selected_patient().unwrap().is_none());
        assert!(store.error().unwrap().is_none());
    }

    #[tokio::test]
    async fn added_medication_is_listed_exactly_once() {
        let (_, store) = seeded();
        store.load_all(&user()).await.unwrap();

        let added = store.add_medication("p2", &medication_draft("Aspirin")).await.unwrap();
        let meds = store.patient_medications("p2").unwrap();
        assert_eq!(meds.iter().filter(|m| m.id == added.id).count(), 1);
        assert_eq!(meds[0].name, "Aspirin");
    }

    #[tokio::test]
    async fn update_refreshes_selected_patient() {
        let (_, store) = seeded();
        store.load_all(&user()).await.unwrap();
        store.select_patient("p1").unwrap();

        store
            .update_patient("p1", &PatientUpdate::name("Ana Maria"))
            .await
            .unwrap();

        let selected = store.selected_patient().unwrap().unwrap();
        assert_eq!(selected.name, "Ana Maria");
        assert_eq!(store.patient("p1").unwrap().unwrap(), selected);
    }

    #[tokio::test]
    async fn failed_mutation_sets_error_and_next_one_clears_it() {
        let (gateway, store) = seeded();
        store.load_all(&user()).await.unwrap();
        gateway.fail(
            Collection::Patients,
            Operation::Insert,
            GatewayError::Backend {
                status: 500,
                body: "db down".into(),
            },
        );
        let draft = PatientDraft {
            name: "Cleo".into(),
            date_of_birth: None,
            gender: Gender::Other,
            medical_conditions: vec![],
            caregivers: vec![],
            height_cm: None,
            weight_kg: None,
        };

        assert!(store.add_patient(&draft).await.is_err());
        assert_eq!(store.snapshot().unwrap().patients.len(), 2);
        assert!(store.error().unwrap().unwrap().contains("db down"));

        gateway.clear_failures();
        store.add_patient(&draft).await.unwrap();
        assert!(store.error().unwrap().is_none());
        assert_eq!(store.snapshot().unwrap().patients.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_medication() {
        let (gateway, store) = seeded();
        store.load_all(&user()).await.unwrap();

        store.delete_medication("m1").await.unwrap();
        assert!(store.patient_medications("p1").unwrap().is_empty());
        assert!(gateway.rows(Collection::Medications).is_empty());
    }

    #[tokio::test]
    async fn mark_dose_is_local_until_synced() {
        let (gateway, store) = seeded();
        store.load_all(&user()).await.unwrap();

        let dose = store
            .mark_dose("m1", "d1", DoseStatus::Taken, Some("with food".into()))
            .unwrap();
        assert_eq!(dose.status, DoseStatus::Taken);
        assert!(dose.taken_at.is_some());
        assert_eq!(gateway.calls(Collection::Medications, Operation::Update), 0);
        assert_eq!(gateway.rows(Collection::Medications)[0]["doses"][0]["status"], "pending");

        store.sync_medication_doses("m1").await.unwrap();
        assert_eq!(gateway.calls(Collection::Medications, Operation::Update), 1);
        assert_eq!(gateway.rows(Collection::Medications)[0]["doses"][0]["status"], "taken");
    }

    #[tokio::test]
    async fn resolved_dose_cannot_go_back_to_pending() {
        let (_, store) = seeded();
        store.load_all(&user()).await.unwrap();
        store.mark_dose("m1", "d1", DoseStatus::Missed, None).unwrap();

        let err = store.mark_dose("m1", "d1", DoseStatus::Pending, None).unwrap_err();
        assert!(matches!(err, StoreError::Model(_)));
        assert!(store.error().unwrap().is_some());
        assert_eq!(
            store.patient_medications("p1").unwrap()[0].doses[0].status,
            DoseStatus::Missed
        );
        assert!(matches!(
            store.mark_dose("m1", "zzz", DoseStatus::Taken, None),
            Err(StoreError::NotFound { entity: "Dose", .. })
        ));
    }

    #[tokio::test]
    async fn todays_doses_use_local_calendar_day() {
        let gateway = Arc::new(InMemoryGateway::signed_in("u1"));
        gateway.seed(Collection::Patients, patient_row("p1", "Ana", "2026-01-01T00:00:00Z"));
        gateway.seed(
            Collection::Medications,
            medication_row(
                "m1",
                "p1",
                false,
                json!([
                    { "id": "late", "scheduled_time": "2026-03-01T23:30:00Z", "status": "pending" },
                    { "id": "yesterday", "scheduled_time": "2026-03-01T12:00:00Z", "status": "taken" },
                    { "id": "morning", "scheduled_time": "2026-03-02T06:00:00Z", "status": "pending" }
                ]),
            ),
        );
        let store = EntityStore::new(Repository::new(gateway));
        store.load_all(&user()).await.unwrap();

        // 2026-03-02 10:00 at UTC+02:00; 23:30Z on the 1st is 01:30 local on the 2nd.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let doses = store.todays_doses_at(&now).unwrap();

        let ids: Vec<_> = doses.iter().map(|d| d.dose.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "morning"]);
        assert_eq!(doses[0].medication_name, "Med m1");
        assert_eq!(doses[0].patient_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn added_measurements_keep_newest_first_order() {
        let (_, store) = seeded();
        store.load_all(&user()).await.unwrap();
        let older = "2026-01-15T09:00:00Z".parse().unwrap();
        let newer = "2026-02-15T09:00:00Z".parse().unwrap();

        store
            .add_measurement("p2", &MeasurementDraft::new(MeasurementType::HeartRate, 80.0, older))
            .await
            .unwrap();
        store
            .add_measurement("p2", &MeasurementDraft::new(MeasurementType::HeartRate, 90.0, newer))
            .await
            .unwrap();

        let times: Vec<_> = store
            .patient_measurements("p2")
            .unwrap()
            .iter()
            .map(|m| m.recorded_at)
            .collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(times, sorted);
        assert_eq!(times.len(), 3);
    }

    // ── Concurrency ─────────────────────────────────────────

    /// Holds inserts and updates keyed by the payload's `name` until opened.
    struct GatedGateway {
        inner: Arc<InMemoryGateway>,
        gates: Mutex<HashMap<String, Arc<Semaphore>>>,
        waiting: AtomicUsize,
    }

    impl GatedGateway {
        fn new(inner: Arc<InMemoryGateway>) -> Self {
            Self {
                inner,
                gates: Mutex::new(HashMap::new()),
                waiting: AtomicUsize::new(0),
            }
        }

        fn gate(&self, name: &str) -> Arc<Semaphore> {
            self.gates
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0)))
                .clone()
        }

        fn open(&self, name: &str) {
            self.gate(name).add_permits(1);
        }

        async fn hold(&self, record: &Value) {
            let name = record["name"].as_str().unwrap_or_default().to_string();
            let gate = self.gate(&name);
            self.waiting.fetch_add(1, Ordering::SeqCst);
            gate.acquire().await.unwrap().forget();
        }
    }

    #[async_trait]
    impl RemoteGateway for GatedGateway {
        async fn list(
            &self,
            collection: Collection,
            filter: &ListFilter,
        ) -> Result<Vec<Value>, GatewayError> {
            self.inner.list(collection, filter).await
        }

        async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, GatewayError> {
            self.inner.get(collection, id).await
        }

        async fn insert(&self, collection: Collection, record: Value) -> Result<Value, GatewayError> {
            self.hold(&record).await;
            self.inner.insert(collection, record).await
        }

        async fn update(
            &self,
            collection: Collection,
            id: &str,
            patch: Value,
        ) -> Result<Value, GatewayError> {
            self.hold(&patch).await;
            self.inner.update(collection, id, patch).await
        }

        async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
            self.inner.delete(collection, id).await
        }
    }

    fn gated() -> (Arc<GatedGateway>, EntityStore) {
        let inner = Arc::new(InMemoryGateway::signed_in("u1"));
        inner.seed(Collection::Patients, patient_row("p1", "Ana", "2026-01-01T00:00:00Z"));
        let gateway = Arc::new(GatedGateway::new(inner));
        let store = EntityStore::new(Repository::new(gateway.clone()));
        (gateway, store)
    }

    #[tokio::test]
    async fn concurrent_updates_resolve_to_last_completion() {
        let (gateway, store) = gated();
        store.load_all(&user()).await.unwrap();
        store.select_patient("p1").unwrap();

        let (to_a, to_b) = (PatientUpdate::name("A"), PatientUpdate::name("B"));
        let first = store.update_patient("p1", &to_a);
        let second = store.update_patient("p1", &to_b);
        let release = async {
            while gateway.waiting.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
            // B's response lands first, A's last.
            gateway.open("B");
            while store.patient("p1").unwrap().unwrap().name != "B" {
                tokio::task::yield_now().await;
            }
            gateway.open("A");
        };

        let (a, b, ()) = tokio::join!(first, second, release);
        a.unwrap();
        b.unwrap();

        assert_eq!(store.patient("p1").unwrap().unwrap().name, "A");
        assert_eq!(store.selected_patient().unwrap().unwrap().name, "A");
    }

    #[tokio::test]
    async fn completion_after_reset_is_discarded() {
        let (gateway, store) = gated();
        store.load_all(&user()).await.unwrap();
        let draft = PatientDraft {
            name: "Late".into(),
            date_of_birth: None,
            gender: Gender::Unspecified,
            medical_conditions: vec![],
            caregivers: vec![],
            height_cm: None,
            weight_kg: None,
        };

        let add = store.add_patient(&draft);
        let reset = async {
            while gateway.waiting.load(Ordering::SeqCst) < 1 {
                tokio::task::yield_now().await;
            }
            store.reset().unwrap();
            gateway.open("Late");
        };

        let (result, ()) = tokio::join!(add, reset);
        assert_eq!(result.unwrap_err(), StoreError::Stale);
        let state = store.snapshot().unwrap();
        assert!(state.patients.is_empty());
        assert!(state.error.is_none());
    }
}
