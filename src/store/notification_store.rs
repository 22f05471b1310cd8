//! Notification feed and delivery preferences for the signed-in user.
//!
//! Every mutation writes through to the backend before touching the local
//! list. Preferences are read from current state whenever they are needed,
//! so deferred callers (reminder timers, push listeners) holding an
//! `Arc<NotificationStore>` always see the latest values.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use futures::future::join_all;

use super::{Generation, StoreError};
use crate::config::NOTIFICATION_FETCH_LIMIT;
use crate::gateway::{GatewayError, Repository, UserIdentity};
use crate::models::{Notification, NotificationDraft, NotificationPreferences};

/// In-app toast surface.
pub trait Toaster: Send + Sync {
    fn show(&self, title: &str, message: &str);
}

/// Toasts as log lines, for headless use.
#[derive(Debug, Default)]
pub struct TracingToaster;

impl Toaster for TracingToaster {
    fn show(&self, title: &str, message: &str) {
        tracing::info!(title, message, "Notification");
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    pub user: Option<UserIdentity>,
    /// Newest first.
    pub notifications: Vec<Notification>,
    pub preferences: NotificationPreferences,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct NotificationStore {
    repository: Repository,
    toaster: Arc<dyn Toaster>,
    state: RwLock<NotificationState>,
    generation: Generation,
}

impl NotificationStore {
    pub fn new(repository: Repository) -> Self {
        Self::with_toaster(repository, Arc::new(TracingToaster))
    }

    pub fn with_toaster(repository: Repository, toaster: Arc<dyn Toaster>) -> Self {
        Self {
            repository,
            toaster,
            state: RwLock::new(NotificationState::default()),
            generation: Generation::default(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NotificationState>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NotificationState>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Clear the previous error; returns the generation and signed-in user id.
    fn begin(&self) -> Result<(u64, String), StoreError> {
        let mut state = self.write()?;
        state.error = None;
        let user_id = state
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or(StoreError::NoSession)?;
        Ok((self.generation.current(), user_id))
    }

    fn commit<T>(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut NotificationState) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.write()?;
        if !self.generation.is_current(generation) {
            return Err(StoreError::Stale);
        }
        Ok(apply(&mut state))
    }

    fn fail(&self, generation: u64, operation: &str, err: impl Into<StoreError>) -> StoreError {
        let err = err.into();
        tracing::warn!(operation, error = %err, "Notification store operation failed");
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

    /// Fetch the feed and preferences for `user`.
    ///
    /// Missing or unreadable preferences fall back to defaults.
    pub async fn load(&self, user: &UserIdentity) -> Result<(), StoreError> {
        let generation = {
            let mut state = self.write()?;
            state.user = Some(user.clone());
            state.loading = true;
            state.error = None;
            self.generation.current()
        };

        let (notifications, preferences) = tokio::join!(
            self.repository
                .fetch_notifications(&user.id, NOTIFICATION_FETCH_LIMIT),
            self.repository.fetch_preferences(&user.id),
        );

        let preferences = preferences.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not load notification preferences, using defaults");
            NotificationPreferences::default()
        });
        let notifications = match notifications {
            Ok(list) => list,
            Err(e) => {
                let err = self.fail(generation, "load", e);
                let _ = self.commit(generation, |state| {
                    state.preferences = preferences;
                    state.loading = false;
                });
                return Err(err);
            }
        };

        tracing::info!(count = notifications.len(), "Notifications loaded");
        self.commit(generation, |state| {
            state.notifications = notifications;
            state.preferences = preferences;
            state.loading = false;
        })
    }

    /// Re-fetch the feed for the current user.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let (generation, user_id) = self.begin()?;
        let result = self
            .repository
            .fetch_notifications(&user_id, NOTIFICATION_FETCH_LIMIT)
            .await;
        let notifications = self.settle(generation, "reload", result)?;
        self.commit(generation, |state| state.notifications = notifications)
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        self.generation.advance();
        *state = NotificationState::default();
        Ok(())
    }

    pub fn snapshot(&self) -> Result<NotificationState, StoreError> {
        Ok(self.read()?.clone())
    }

    pub fn notifications(&self) -> Result<Vec<Notification>, StoreError> {
        Ok(self.read()?.notifications.clone())
    }

    pub fn preferences(&self) -> Result<NotificationPreferences, StoreError> {
        Ok(self.read()?.preferences.clone())
    }

    pub fn error(&self) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.error.clone())
    }

    pub fn unread_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.notifications.iter().filter(|n| !n.read).count())
    }

    // ── Mutations ───────────────────────────────────────────

    /// Persist, prepend locally and toast when push notifications are on.
    pub async fn add_notification(
        &self,
        draft: NotificationDraft,
    ) -> Result<Notification, StoreError> {
        let (generation, user_id) = self.begin()?;
        let result = self
            .repository
            .insert_notification(&user_id, &draft, Utc::now())
            .await;
        let notification = self.settle(generation, "add_notification", result)?;
        let push_enabled = self.commit(generation, |state| {
            state.notifications.insert(0, notification.clone());
            state.preferences.push_notifications
        })?;

        if push_enabled {
            self.toaster.show(&notification.title, &notification.message);
        }
        Ok(notification)
    }

    /// Toast an externally delivered message, subject to current preferences.
    pub fn show_toast(&self, title: &str, message: &str) -> Result<bool, StoreError> {
        let enabled = self.read()?.preferences.push_notifications;
        if enabled {
            self.toaster.show(title, message);
        }
        Ok(enabled)
    }

    fn local_read_flag(&self, id: &str) -> Result<bool, StoreError> {
        self.read()?
            .notifications
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.read)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Notification",
                id: id.to_string(),
            })
    }

    async fn write_read_flag(&self, id: &str, read: bool) -> Result<(), StoreError> {
        let (generation, _) = self.begin()?;
        let result = self.repository.set_notification_read(id, read).await;
        let stored = self.settle(generation, "set_read", result)?;
        self.commit(generation, |state| {
            if let Some(n) = state.notifications.iter_mut().find(|n| n.id == stored.id) {
                n.read = stored.read;
            }
        })
    }

    /// Mark one notification read. Already-read is a no-op.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), StoreError> {
        if self.local_read_flag(id)? {
            return Ok(());
        }
        self.write_read_flag(id, true).await
    }

    /// Mark every unread notification read. Only unread rows are written,
    /// so a repeated call issues no backend requests.
    pub async fn mark_all_as_read(&self) -> Result<(), StoreError> {
        let (generation, _) = self.begin()?;
        let unread: Vec<String> = self
            .read()?
            .notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(());
        }

        let results = join_all(
            unread
                .iter()
                .map(|id| self.repository.set_notification_read(id, true)),
        )
        .await;

        let mut first_error = None;
        let mut marked = Vec::new();
        for result in results {
            match result {
                Ok(stored) => marked.push(stored.id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        self.commit(generation, |state| {
            for n in state.notifications.iter_mut() {
                if marked.contains(&n.id) {
                    n.read = true;
                }
            }
        })?;
        tracing::debug!(count = marked.len(), "Notifications marked read");

        match first_error {
            Some(e) => Err(self.fail(generation, "mark_all_as_read", e)),
            None => Ok(()),
        }
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), StoreError> {
        let (generation, _) = self.begin()?;
        let result = self.repository.delete_notification(id).await;
        self.settle(generation, "delete_notification", result)?;
        self.commit(generation, |state| state.notifications.retain(|n| n.id != id))
    }

    /// Flip the read flag, persisting either direction. Returns the new flag.
    pub async fn toggle_read_status(&self, id: &str) -> Result<bool, StoreError> {
        if self.local_read_flag(id)? {
            self.write_read_flag(id, false).await?;
            Ok(false)
        } else {
            self.mark_as_read(id).await?;
            Ok(true)
        }
    }

    pub async fn update_preferences(
        &self,
        preferences: &NotificationPreferences,
    ) -> Result<NotificationPreferences, StoreError> {
        let (generation, user_id) = self.begin()?;
        let result = self.repository.save_preferences(&user_id, preferences).await;
        let stored = self.settle(generation, "update_preferences", result)?;
        self.commit(generation, |state| state.preferences = stored.clone())?;
        tracing::info!(
            push = stored.push_notifications,
            medication = stored.medication_reminders,
            appointment = stored.appointment_reminders,
            "Notification preferences updated"
        );
        Ok(stored)
    }
}
