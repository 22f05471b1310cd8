//! Domain records held by the stores.
//!
//! Every record deserializes from the canonical (snake_case) row shape
//! produced by `gateway::normalize`. Drafts and updates are the write
//! payloads; update structs skip absent fields so a PATCH only touches
//! what the caller set.

pub mod appointment;
pub mod daily_log;
pub mod enums;
pub mod measurement;
pub mod medication;
pub mod notification;
pub mod patient;

pub use appointment::*;
pub use daily_log::*;
pub use enums::*;
pub use measurement::*;
pub use medication::*;
pub use notification::*;
pub use patient::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Dose {dose_id} is already {from}; cannot move back to {to}")]
    InvalidDoseTransition {
        dose_id: String,
        from: DoseStatus,
        to: DoseStatus,
    },
}
