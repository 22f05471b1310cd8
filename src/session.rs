//! Session lifecycle.
//!
//! `SessionManager` owns the stores for one app instance and keeps them in
//! step with the auth provider's identity: when the signed-in user changes
//! (including to nobody) every store is reset and background listeners
//! are torn down, then a new identity gets a full bulk load, a realtime
//! subscription on its notifications and a best-effort push registration.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::gateway::storage::{attachment_path, upload_with_retry};
use crate::gateway::{
    AuthProvider, ChangeKind, Collection, FileStorage, GatewayError, InMemoryGateway, ListFilter,
    PushMessaging, RealtimeChannel, Repository, RestGateway, StorageError, UserIdentity,
};
use crate::store::{EntityStore, NotificationStore, ReminderScheduler, StoreError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Auth provider error: {0}")]
    Auth(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Attachment storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No signed-in user")]
    NoSession,
}

pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    realtime: Option<Arc<dyn RealtimeChannel>>,
    push: Option<Arc<dyn PushMessaging>>,
    entities: Arc<EntityStore>,
    notifications: Arc<NotificationStore>,
    reminders: ReminderScheduler,
    /// Held across a refresh so identity changes are applied one at a time.
    current_user: tokio::sync::Mutex<Option<UserIdentity>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        entities: Arc<EntityStore>,
        notifications: Arc<NotificationStore>,
    ) -> Self {
        Self {
            auth,
            realtime: None,
            push: None,
            entities,
            reminders: ReminderScheduler::new(Arc::clone(&notifications)),
            notifications,
            current_user: tokio::sync::Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Session over the in-memory backend, with realtime wired up.
    pub fn offline(gateway: Arc<InMemoryGateway>) -> Self {
        let repository = Repository::new(gateway.clone());
        Self::new(
            gateway.clone(),
            Arc::new(EntityStore::new(repository.clone())),
            Arc::new(NotificationStore::new(repository)),
        )
        .with_realtime(gateway)
    }

    /// Session over the HTTP backend. No realtime channel.
    pub fn remote(gateway: Arc<RestGateway>) -> Self {
        let repository = Repository::new(gateway.clone());
        Self::new(
            gateway,
            Arc::new(EntityStore::new(repository.clone())),
            Arc::new(NotificationStore::new(repository)),
        )
    }

    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeChannel>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn with_push(mut self, push: Arc<dyn PushMessaging>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub async fn current_user(&self) -> Option<UserIdentity> {
        self.current_user.lock().await.clone()
    }

    /// Re-read the identity from the auth provider and apply any change.
    ///
    /// An unchanged identity is a no-op. Load failures are returned after
    /// listeners are started; the stores keep their error fields set.
    pub async fn refresh_identity(&self) -> Result<Option<UserIdentity>, SessionError> {
        let user = self.auth.current_user().await?;
        let mut current = self.current_user.lock().await;
        if current.as_ref().map(|u| &u.id) == user.as_ref().map(|u| &u.id) {
            return Ok(user);
        }

        self.teardown()?;
        *current = user.clone();
        let Some(user) = user else {
            tracing::info!("Identity cleared, session state reset");
            return Ok(None);
        };
        tracing::info!(user_id = %user.id, "Session started");

        let (entities, notifications) = tokio::join!(
            self.entities.load_all(&user),
            self.notifications.load(&user),
        );
        self.start_realtime(&user);
        self.start_push(&user).await;

        entities?;
        notifications?;
        Ok(Some(user))
    }

    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let mut current = self.current_user.lock().await;
        self.auth.sign_out().await?;
        self.teardown()?;
        *current = None;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Upload an attachment into the signed-in user's namespace.
    pub async fn upload_attachment(
        &self,
        storage: &dyn FileStorage,
        patient_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, SessionError> {
        let user_id = self
            .current_user()
            .await
            .map(|u| u.id)
            .ok_or(SessionError::NoSession)?;
        let path = attachment_path(&user_id, patient_id, file_name);
        let stored = upload_with_retry(storage, &path, bytes, content_type).await?;
        tracing::info!(patient_id, path = %stored, "Attachment uploaded");
        Ok(stored)
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(handle);
        }
    }

    fn stop_listeners(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for handle in listeners.drain(..) {
                handle.abort();
            }
        }
    }

    fn teardown(&self) -> Result<(), SessionError> {
        self.stop_listeners();
        self.reminders.cancel_all();
        self.entities.reset()?;
        self.notifications.reset()?;
        Ok(())
    }

    /// Reload the notification feed whenever a row is inserted for `user`.
    fn start_realtime(&self, user: &UserIdentity) {
        let Some(realtime) = &self.realtime else {
            return;
        };
        let mut subscription =
            match realtime.subscribe(Collection::Notifications, ListFilter::for_user(&user.id)) {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!(error = %e, "Realtime subscription failed, live updates disabled");
                    return;
                }
            };

        let notifications = Arc::clone(&self.notifications);
        self.track(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                // A null record marks dropped events; reload to resync.
                if event.kind != ChangeKind::Insert && !event.record.is_null() {
                    continue;
                }
                if let Err(e) = notifications.reload().await {
                    tracing::warn!(error = %e, "Notification reload after change failed");
                }
            }
        }));
    }

    async fn start_push(&self, user: &UserIdentity) {
        let Some(push) = &self.push else {
            return;
        };
        match push.register_device(user).await {
            Ok(_) => tracing::info!(user_id = %user.id, "Push device registered"),
            Err(e) => tracing::warn!(error = %e, "Push registration failed"),
        }

        let Some(mut messages) = push.foreground_messages() else {
            return;
        };
        let notifications = Arc::clone(&self.notifications);
        self.track(tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) => {
                        if let Err(e) = notifications.show_toast(&message.title, &message.body) {
                            tracing::warn!(error = %e, "Foreground push dropped");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Foreground push listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}
