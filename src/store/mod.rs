//! In-memory session stores.
//!
//! `EntityStore` caches patient-scoped records, `NotificationStore` the
//! user's notification feed and preferences. Both are populated by a bulk
//! load at session start, mutated only after the backend write succeeds,
//! and reset whenever the signed-in identity changes.
//!
//! Each store carries a generation counter. `reset()` bumps it; a request
//! that started under an older generation is discarded on completion
//! (`StoreError::Stale`) instead of writing into the new session's state.

pub mod entity_store;
pub mod load_report;
pub mod notification_store;
pub mod reminders;

pub use entity_store::{EntityState, EntityStore, TodayDose};
pub use load_report::{CollectionFailure, LoadReport, PatientLoad};
pub use notification_store::{NotificationState, NotificationStore, Toaster, TracingToaster};
pub use reminders::{ReminderJob, ReminderKind, ReminderScheduler};

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::models::ModelError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Session changed while the request was in flight")]
    Stale,

    #[error("Internal lock error")]
    LockPoisoned,

    #[error("No signed-in user")]
    NoSession,
}

/// Session generation shared by a store's in-flight requests.
#[derive(Debug, Default)]
pub(crate) struct Generation(AtomicU64);

impl Generation {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate every request started before this call.
    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
