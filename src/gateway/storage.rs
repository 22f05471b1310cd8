//! Attachment blob storage.
//!
//! Blobs are addressed by an opaque path under a per-user namespace:
//! `{user_id}/{patient_id}/{uuid}-{file_name}`. Uploads are the only
//! backend calls with a client-side retry (fixed attempts, linear backoff).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{UPLOAD_MAX_ATTEMPTS, UPLOAD_RETRY_BASE_DELAY};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Storage network error: {0}")]
    Network(String),

    #[error("Storage backend error {status}: {body}")]
    Backend { status: u16, body: String },
}

impl StorageError {
    /// Whether retrying the same request can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(_) | StorageError::Network(_) => true,
            StorageError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `bytes` at `path`; returns the stored path.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited URL for displaying the blob.
    async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<String, StorageError>;

    async fn remove(&self, path: &str) -> Result<(), StorageError>;
}

// ═══════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════

/// Reject absolute paths, traversal and empty segments.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

/// Keep file names to a safe character set.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Unique attachment path inside the user's namespace.
pub fn attachment_path(user_id: &str, patient_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}-{}",
        sanitize_file_name(user_id),
        sanitize_file_name(patient_id),
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

// ═══════════════════════════════════════════
// Retry
// ═══════════════════════════════════════════

/// Upload with the default retry policy.
pub async fn upload_with_retry(
    storage: &dyn FileStorage,
    path: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<String, StorageError> {
    upload_with_policy(
        storage,
        path,
        bytes,
        content_type,
        UPLOAD_MAX_ATTEMPTS,
        UPLOAD_RETRY_BASE_DELAY,
    )
    .await
}

/// Upload, retrying transient failures. Attempt `n` (1-based) is preceded
/// by a wait of `(n - 1) * base_delay`.
pub async fn upload_with_policy(
    storage: &dyn FileStorage,
    path: &str,
    bytes: Vec<u8>,
    content_type: &str,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<String, StorageError> {
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match storage.upload(path, bytes.clone(), content_type).await {
            Ok(stored) => return Ok(stored),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(attempt, path, error = %e, "Upload failed, retrying");
                tokio::time::sleep(base_delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ═══════════════════════════════════════════
// Local filesystem storage
// ═══════════════════════════════════════════

/// Blob storage on the local filesystem, rooted at `root`.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage under the application data directory.
    pub fn default_location() -> Self {
        Self::new(crate::config::attachments_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

fn io_error(path: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e.to_string())
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(path, e))?;
        tracing::debug!(path, "Stored attachment");
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target).await.map_err(|e| io_error(path, e))
    }

    async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        if !tokio::fs::try_exists(&target)
            .await
            .map_err(|e| io_error(path, e))?
        {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero());
        Ok(format!(
            "file://{}?expires={}",
            target.display(),
            expires_at.timestamp()
        ))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| io_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` uploads with the given error.
    struct FlakyStorage {
        failures: u32,
        error: StorageError,
        attempts: AtomicU32,
    }

    impl FlakyStorage {
        fn new(failures: u32, error: StorageError) -> Self {
            Self {
                failures,
                error,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FileStorage for FlakyStorage {
        async fn upload(&self, path: &str, _: Vec<u8>, _: &str) -> Result<String, StorageError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(path.to_string())
            }
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(path.into()))
        }

        async fn signed_url(&self, path: &str, _: Duration) -> Result<String, StorageError> {
            Err(StorageError::NotFound(path.into()))
        }

        async fn remove(&self, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn path_validation() {
        assert!(validate_path("u1/p1/a.png").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("u1/../u2/a.png").is_err());
        assert!(validate_path("u1//a.png").is_err());
    }

    #[test]
    fn attachment_path_is_namespaced_and_sanitized() {
        let path = attachment_path("user-1", "p1", "lab report (1).pdf");
        assert!(path.starts_with("user-1/p1/"));
        assert!(path.ends_with("-lab_report__1_.pdf"));
        assert!(validate_path(&path).is_ok());
        assert_ne!(path, attachment_path("user-1", "p1", "lab report (1).pdf"));
    }

    #[test]
    fn traversal_in_names_is_neutralized() {
        let path = attachment_path("..", "p1", "..");
        assert!(validate_path(&path).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_once() {
        let storage = FlakyStorage::new(1, StorageError::Network("reset".into()));
        let started = tokio::time::Instant::now();
        let stored = upload_with_retry(&storage, "u1/p1/a", vec![1], "image/png")
            .await
            .unwrap();
        assert_eq!(stored, "u1/p1/a");
        assert_eq!(storage.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), UPLOAD_RETRY_BASE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let storage = FlakyStorage::new(5, StorageError::Backend { status: 503, body: String::new() });
        let err = upload_with_retry(&storage, "u1/p1/a", vec![1], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend { status: 503, .. }));
        assert_eq!(storage.attempts.load(Ordering::SeqCst), UPLOAD_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let storage = FlakyStorage::new(5, StorageError::NotAuthenticated);
        let err = upload_with_retry(&storage, "u1/p1/a", vec![1], "image/png")
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotAuthenticated);
        assert_eq!(storage.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.upload("u1/p1/x.txt", b"hello".to_vec(), "text/plain").await.unwrap();

        assert_eq!(storage.download("u1/p1/x.txt").await.unwrap(), b"hello");
        let url = storage
            .signed_url("u1/p1/x.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        storage.remove("u1/p1/x.txt").await.unwrap();
        assert!(matches!(
            storage.download("u1/p1/x.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.upload("../escape", vec![], "text/plain").await,
            Err(StorageError::InvalidPath(_))
        ));
    }
}
