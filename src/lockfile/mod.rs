//! Advisory lock files
//!
//! A lock file is an empty sibling object named `<blob>.LOCK`. Its presence
//! means "busy". Nothing enforces it: cooperating writers check for it, and
//! it has no relation to native leases.
//!
//! Creation checks for the marker first, then creates it with a conditional
//! create-if-absent so two writers racing past the check cannot both win.

use crate::backend::BlobBackend;
use crate::error::{translate, StorageError};
use crate::metrics;
use bytes::Bytes;
use std::sync::Arc;

/// Suffix appended to a blob name to form its lock file name
pub const LOCK_FILE_SUFFIX: &str = ".LOCK";

/// Lock file name for a blob
pub fn lock_file_name(blob: &str) -> String {
    format!("{}{}", blob, LOCK_FILE_SUFFIX)
}

/// Creates and removes lock files in one container
#[derive(Clone)]
pub struct LockFileManager {
    backend: Arc<dyn BlobBackend>,
    container: String,
}

impl LockFileManager {
    pub fn new(backend: Arc<dyn BlobBackend>, container: &str) -> Self {
        Self {
            backend,
            container: container.to_string(),
        }
    }

    /// Create the lock file for `blob`; `AlreadyExists` if it is present
    #[tracing::instrument(
        name = "lockfile.create",
        skip(self),
        fields(container = %self.container, blob = %blob),
        err
    )]
    pub async fn create(&self, blob: &str) -> Result<(), StorageError> {
        let name = lock_file_name(blob);

        let result = self.try_create(&name).await;
        let outcome = match &result {
            Ok(()) => "created",
            Err(StorageError::AlreadyExists(_)) => "exists",
            Err(_) => "error",
        };
        metrics::record_lock_file_operation("create", outcome);

        result
    }

    async fn try_create(&self, name: &str) -> Result<(), StorageError> {
        if self
            .backend
            .exists(&self.container, name)
            .await
            .map_err(translate)?
        {
            return Err(StorageError::AlreadyExists(format!(
                "lock file {} already exists",
                name
            )));
        }

        self.backend
            .create_if_absent(&self.container, name, Bytes::new())
            .await
            .map_err(translate)
    }

    /// Remove the lock file for `blob`; succeeds when it is already gone
    #[tracing::instrument(
        name = "lockfile.delete",
        skip(self),
        fields(container = %self.container, blob = %blob),
        err
    )]
    pub async fn delete(&self, blob: &str) -> Result<(), StorageError> {
        let result = self
            .backend
            .delete_if_exists(&self.container, &lock_file_name(blob), None)
            .await
            .map_err(translate);
        metrics::record_lock_file_operation("delete", if result.is_ok() { "deleted" } else { "error" });
        result
    }

    /// Whether the lock file for `blob` is present
    pub async fn is_locked(&self, blob: &str) -> Result<bool, StorageError> {
        self.backend
            .exists(&self.container, &lock_file_name(blob))
            .await
            .map_err(translate)
    }

    /// Fail with `Busy` while the lock file for `blob` is present
    pub async fn ensure_unlocked(&self, blob: &str) -> Result<(), StorageError> {
        if self.is_locked(blob).await? {
            return Err(StorageError::Busy(format!(
                "{} is locked by {}",
                blob,
                lock_file_name(blob)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn manager() -> (Arc<MemoryBackend>, LockFileManager) {
        let backend = Arc::new(MemoryBackend::new("acct", 16).with_container("c"));
        let manager = LockFileManager::new(backend.clone(), "c");
        (backend, manager)
    }

    #[test]
    fn test_lock_file_name() {
        assert_eq!(lock_file_name("logs/app.log"), "logs/app.log.LOCK");
    }

    #[tokio::test]
    async fn test_create_twice() {
        let (backend, manager) = manager();

        manager.create("data.csv").await.unwrap();
        assert_eq!(backend.contents("c", "data.csv.LOCK"), Some(Vec::new()));

        let second = manager.create("data.csv").await;
        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_backend, manager) = manager();

        manager.delete("data.csv").await.unwrap();
        manager.create("data.csv").await.unwrap();
        manager.delete("data.csv").await.unwrap();
        manager.delete("data.csv").await.unwrap();
        assert!(!manager.is_locked("data.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_unlocked() {
        let (_backend, manager) = manager();

        manager.ensure_unlocked("data.csv").await.unwrap();
        manager.create("data.csv").await.unwrap();
        assert!(matches!(
            manager.ensure_unlocked("data.csv").await,
            Err(StorageError::Busy(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_does_not_touch_blob_lease() {
        let (backend, manager) = manager();
        backend.create_append_blob("c", "data.csv").await.unwrap();

        manager.create("data.csv").await.unwrap();
        assert_eq!(backend.lease_of("c", "data.csv"), None);
        assert!(backend.lease_events().is_empty());
    }
}
