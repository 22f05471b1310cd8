//! Backend boundary.
//!
//! The hosted backend (row CRUD, auth, realtime, file storage) is consumed
//! through the traits below. Rows cross the boundary as opaque JSON and
//! are normalized to the canonical snake_case shape exactly once, in
//! `Repository`, before anything is decoded into `models`.
//!
//! Implementations:
//! - `RestGateway`: PostgREST-style HTTP backend (`reqwest`)
//! - `InMemoryGateway`: process-local backend for offline use and tests

pub mod memory;
pub mod normalize;
pub mod repository;
pub mod rest;
pub mod storage;

pub use memory::InMemoryGateway;
pub use repository::Repository;
pub use rest::RestGateway;
pub use storage::{FileStorage, LocalFileStorage, StorageError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Record not found: {collection} with id {id}")]
    NotFound { collection: String, id: String },

    #[error("Malformed {collection} record: {reason}")]
    Decode { collection: String, reason: String },

    #[error("Realtime channel error: {0}")]
    Realtime(String),
}

// ═══════════════════════════════════════════════════════════
// Collections and filters
// ═══════════════════════════════════════════════════════════

/// Backend tables consumed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Patients,
    Medications,
    Measurements,
    DailyLogs,
    Notifications,
    Appointments,
    UserPreferences,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::Medications => "medications",
            Collection::Measurements => "measurements",
            Collection::DailyLogs => "daily_logs",
            Collection::Notifications => "notifications",
            Collection::Appointments => "appointments",
            Collection::UserPreferences => "user_preferences",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Inclusive time window on a timestamp column.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub column: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Filter for `RemoteGateway::list`. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub patient_id: Option<String>,
    pub user_id: Option<String>,
    /// Matches the row's `type` column.
    pub record_type: Option<String>,
    pub range: Option<DateRange>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_patient(patient_id: &str) -> Self {
        Self {
            patient_id: Some(patient_id.to_string()),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, record_type: &str) -> Self {
        self.record_type = Some(record_type.to_string());
        self
    }

    pub fn between(
        mut self,
        column: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.range = Some(DateRange {
            column: column.to_string(),
            from,
            to,
        });
        self
    }

    pub fn newest_first(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), SortOrder::Descending));
        self
    }

    pub fn oldest_first(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), SortOrder::Ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Row-level match on the equality/range parts of the filter.
    /// Ordering and limit are applied by the caller.
    pub fn matches(&self, row: &Value) -> bool {
        let field_eq = |field: &str, expected: &Option<String>| match expected {
            Some(want) => row.get(field).and_then(Value::as_str) == Some(want.as_str()),
            None => true,
        };
        if !field_eq("patient_id", &self.patient_id)
            || !field_eq("user_id", &self.user_id)
            || !field_eq("type", &self.record_type)
        {
            return false;
        }
        match &self.range {
            Some(range) => {
                let Some(at) = row
                    .get(&range.column)
                    .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
                else {
                    return false;
                };
                range.from.map_or(true, |from| at >= from) && range.to.map_or(true, |to| at <= to)
            }
            None => true,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// CRUD gateway
// ═══════════════════════════════════════════════════════════

/// Row-level CRUD over backend collections.
///
/// Every call returns a value or an error description; nothing panics
/// across this boundary. Calls fail fast with `NotAuthenticated` when
/// there is no session.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list(&self, collection: Collection, filter: &ListFilter)
        -> Result<Vec<Value>, GatewayError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, GatewayError>;

    /// Insert a row and return it as stored (with backend-assigned id).
    async fn insert(&self, collection: Collection, record: Value) -> Result<Value, GatewayError>;

    /// Merge `patch` into the row and return the updated row.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, GatewayError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError>;
}

// ═══════════════════════════════════════════════════════════
// Auth
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<UserIdentity>, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;
}

// ═══════════════════════════════════════════════════════════
// Realtime
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub record: Value,
}

/// Push channel for row changes.
pub trait RealtimeChannel: Send + Sync {
    /// Subscribe to changes on `collection` whose row matches `filter`.
    fn subscribe(
        &self,
        collection: Collection,
        filter: ListFilter,
    ) -> Result<Subscription, GatewayError>;
}

/// Filtered view over a broadcast of change events.
pub struct Subscription {
    collection: Collection,
    filter: ListFilter,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(
        collection: Collection,
        filter: ListFilter,
        receiver: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            collection,
            filter,
            receiver,
        }
    }

    /// Next matching event. `None` once the channel is closed.
    ///
    /// Lagging behind drops events; the subscriber only uses events as a
    /// reload trigger so a synthetic `Update` is yielded in that case.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.collection == self.collection && self.filter.matches(&event.record) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, collection = %self.collection, "Realtime subscriber lagged");
                    return Some(ChangeEvent {
                        collection: self.collection,
                        kind: ChangeKind::Update,
                        record: Value::Null,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Device push
// ═══════════════════════════════════════════════════════════

/// A message delivered while the app is in the foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
}

/// Optional device push messaging. Failures are never fatal.
#[async_trait]
pub trait PushMessaging: Send + Sync {
    /// Register this device for `user` and return its push token.
    async fn register_device(&self, user: &UserIdentity) -> Result<String, GatewayError>;

    /// Foreground message stream, when the platform provides one.
    fn foreground_messages(&self) -> Option<broadcast::Receiver<PushMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn filter_matches_equality_fields() {
        let row = json!({ "patient_id": "p1", "type": "heart_rate" });
        assert!(ListFilter::for_patient("p1").matches(&row));
        assert!(!ListFilter::for_patient("p2").matches(&row));
        assert!(ListFilter::for_patient("p1").with_type("heart_rate").matches(&row));
        assert!(!ListFilter::all().with_type("weight").matches(&row));
    }

    #[test]
    fn filter_matches_inclusive_range() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let filter = ListFilter::all().between("recorded_at", Some(from), Some(to));
        assert!(filter.matches(&json!({ "recorded_at": "2026-01-01T00:00:00Z" })));
        assert!(filter.matches(&json!({ "recorded_at": "2026-01-31T00:00:00Z" })));
        assert!(!filter.matches(&json!({ "recorded_at": "2026-02-01T00:00:00Z" })));
        assert!(!filter.matches(&json!({ "recorded_at": "not a date" })));
    }

    #[test]
    fn collection_names() {
        assert_eq!(Collection::DailyLogs.as_str(), "daily_logs");
        assert_eq!(Collection::UserPreferences.to_string(), "user_preferences");
    }

    #[tokio::test]
    async fn subscription_skips_other_collections_and_rows() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new(Collection::Notifications, ListFilter::for_user("u1"), rx);

        tx.send(ChangeEvent {
            collection: Collection::Patients,
            kind: ChangeKind::Insert,
            record: json!({ "user_id": "u1" }),
        })
        .unwrap();
        tx.send(ChangeEvent {
            collection: Collection::Notifications,
            kind: ChangeKind::Insert,
            record: json!({ "user_id": "u2" }),
        })
        .unwrap();
        tx.send(ChangeEvent {
            collection: Collection::Notifications,
            kind: ChangeKind::Insert,
            record: json!({ "user_id": "u1", "id": "n1" }),
        })
        .unwrap();
        drop(tx);

        let event = sub.next().await.unwrap();
        assert_eq!(event.record["id"], "n1");
        assert!(sub.next().await.is_none());
    }
}
