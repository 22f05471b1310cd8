//! Process-local backend.
//!
//! Implements every gateway trait over in-memory tables. Used for
//! offline sessions and as the test double for the stores. Supports
//! failure injection per collection/operation (optionally scoped to one
//! patient) and counts calls so tests can assert on backend traffic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::storage::{validate_path, FileStorage, StorageError};
use super::{
    AuthProvider, ChangeEvent, ChangeKind, Collection, GatewayError, ListFilter, RealtimeChannel,
    RemoteGateway, SortOrder, Subscription, UserIdentity,
};

/// Realtime buffer; slow subscribers past this many events lag.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Gateway operation, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct FailureRule {
    collection: Collection,
    operation: Operation,
    patient_id: Option<String>,
    error: GatewayError,
}

#[derive(Default)]
struct MemoryState {
    user: Option<UserIdentity>,
    tables: HashMap<Collection, Vec<Value>>,
    blobs: HashMap<String, Vec<u8>>,
    failures: Vec<FailureRule>,
    calls: HashMap<(Collection, Operation), usize>,
}

pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryGateway {
    /// Empty backend with no signed-in user.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            changes,
        }
    }

    /// Empty backend with `user_id` signed in.
    pub fn signed_in(user_id: &str) -> Self {
        let gateway = Self::new();
        gateway.sign_in(user_id);
        gateway
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned table is still structurally valid JSON; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sign_in(&self, user_id: &str) {
        self.lock().user = Some(UserIdentity {
            id: user_id.to_string(),
            email: None,
        });
    }

    /// Insert a raw row without auth checks, events or id assignment.
    pub fn seed(&self, collection: Collection, row: Value) {
        self.lock().tables.entry(collection).or_default().push(row);
    }

    /// Raw rows currently stored in `collection`.
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.lock().tables.get(&collection).cloned().unwrap_or_default()
    }

    /// Make every `operation` on `collection` fail with `error`.
    pub fn fail(&self, collection: Collection, operation: Operation, error: GatewayError) {
        self.lock().failures.push(FailureRule {
            collection,
            operation,
            patient_id: None,
            error,
        });
    }

    /// Make `list` on `collection` fail only when filtered by `patient_id`.
    pub fn fail_list_for_patient(&self, collection: Collection, patient_id: &str) {
        self.lock().failures.push(FailureRule {
            collection,
            operation: Operation::List,
            patient_id: Some(patient_id.to_string()),
            error: GatewayError::Network(format!("connection reset fetching {collection}")),
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of calls made for `operation` on `collection`.
    pub fn calls(&self, collection: Collection, operation: Operation) -> usize {
        self.lock()
            .calls
            .get(&(collection, operation))
            .copied()
            .unwrap_or(0)
    }

    /// Auth check, call accounting and failure injection for one call.
    fn begin(
        &self,
        collection: Collection,
        operation: Operation,
        patient_id: Option<&str>,
    ) -> Result<std::sync::MutexGuard<'_, MemoryState>, GatewayError> {
        let mut state = self.lock();
        *state.calls.entry((collection, operation)).or_default() += 1;
        if state.user.is_none() {
            return Err(GatewayError::NotAuthenticated);
        }
        let injected = state.failures.iter().find(|rule| {
            rule.collection == collection
                && rule.operation == operation
                && (rule.patient_id.is_none() || rule.patient_id.as_deref() == patient_id)
        });
        if let Some(rule) = injected {
            return Err(rule.error.clone());
        }
        Ok(state)
    }

    fn publish(&self, collection: Collection, kind: ChangeKind, record: Value) {
        // No subscribers is not an error.
        let _ = self.changes.send(ChangeEvent {
            collection,
            kind,
            record,
        });
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Column ordering: timestamps chronologically, numbers numerically,
/// everything else as strings. Missing values sort first.
fn compare_column(a: &Value, b: &Value, column: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let (a, b) = match (a.get(column), b.get(column)) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };
    let as_time = |v: &Value| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok();
    if let (Some(a), Some(b)) = (as_time(a), as_time(b)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    a.as_str().unwrap_or_default().cmp(b.as_str().unwrap_or_default())
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn list(
        &self,
        collection: Collection,
        filter: &ListFilter,
    ) -> Result<Vec<Value>, GatewayError> {
        let state = self.begin(collection, Operation::List, filter.patient_id.as_deref())?;
        let mut rows: Vec<Value> = state
            .tables
            .get(&collection)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();
        drop(state);

        if let Some((column, order)) = &filter.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare_column(a, b, column);
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, GatewayError> {
        let state = self.begin(collection, Operation::Get, None)?;
        Ok(state
            .tables
            .get(&collection)
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)))
            .cloned())
    }

    async fn insert(&self, collection: Collection, record: Value) -> Result<Value, GatewayError> {
        let Value::Object(mut map) = record else {
            return Err(GatewayError::Backend {
                status: 400,
                body: format!("{collection} insert expects an object"),
            });
        };
        let patient_id = map.get("patient_id").and_then(Value::as_str).map(String::from);
        let mut state = self.begin(collection, Operation::Insert, patient_id.as_deref())?;

        if !map.get("id").is_some_and(Value::is_string) {
            map.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        map.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let row = Value::Object(map);

        let table = state.tables.entry(collection).or_default();
        if table.iter().any(|existing| row_id(existing) == row_id(&row)) {
            return Err(GatewayError::Backend {
                status: 409,
                body: format!("duplicate key in {collection}"),
            });
        }
        table.push(row.clone());
        drop(state);

        self.publish(collection, ChangeKind::Insert, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, GatewayError> {
        let mut state = self.begin(collection, Operation::Update, None)?;
        let row = state
            .tables
            .get_mut(&collection)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| GatewayError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if let (Value::Object(target), Value::Object(fields)) = (&mut *row, patch) {
            for (key, value) in fields {
                if key != "id" {
                    target.insert(key, value);
                }
            }
            target.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
        let updated = row.clone();
        drop(state);

        self.publish(collection, ChangeKind::Update, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        let mut state = self.begin(collection, Operation::Delete, None)?;
        let rows = state.tables.entry(collection).or_default();
        let position = rows
            .iter()
            .position(|row| row_id(row) == Some(id))
            .ok_or_else(|| GatewayError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let removed = rows.remove(position);
        drop(state);

        self.publish(collection, ChangeKind::Delete, removed);
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for InMemoryGateway {
    async fn current_user(&self) -> Result<Option<UserIdentity>, GatewayError> {
        Ok(self.lock().user.clone())
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.lock().user = None;
        Ok(())
    }
}

impl RealtimeChannel for InMemoryGateway {
    fn subscribe(
        &self,
        collection: Collection,
        filter: ListFilter,
    ) -> Result<Subscription, GatewayError> {
        Ok(Subscription::new(collection, filter, self.changes.subscribe()))
    }
}

#[async_trait]
impl FileStorage for InMemoryGateway {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        validate_path(path)?;
        let mut state = self.lock();
        if state.user.is_none() {
            return Err(StorageError::NotAuthenticated);
        }
        state.blobs.insert(path.to_string(), bytes);
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        self.lock()
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        if !self.lock().blobs.contains_key(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(format!("memory://{path}?expires_in={}", expires_in.as_secs()))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        self.lock()
            .blobs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
