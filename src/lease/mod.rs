//! Lease management
//!
//! Leases are requested with an infinite duration and a client-proposed id.
//! Ownership is tracked by the backend only; this module keeps no lease
//! table of its own.
//!
//! [`LeaseScope`] captures who is responsible for giving a lease back:
//!
//! - [`LeaseScope::Owned`] - acquired by the current operation, released by it
//! - [`LeaseScope::Borrowed`] - supplied by the caller, never released here
//!
//! There is no renewal or expiry watchdog. A process that dies while owning a
//! lease leaves the blob leased until someone breaks the lease.

use crate::backend::BlobBackend;
use crate::error::{translate, StorageError};
use crate::metrics;
use std::sync::Arc;

/// Acquires and releases leases on blobs of one container
#[derive(Clone)]
pub struct LeaseManager {
    backend: Arc<dyn BlobBackend>,
    container: String,
}

impl LeaseManager {
    pub fn new(backend: Arc<dyn BlobBackend>, container: &str) -> Self {
        Self {
            backend,
            container: container.to_string(),
        }
    }

    /// Acquire an infinite lease under a freshly generated id
    pub async fn acquire(&self, blob: &str) -> Result<String, StorageError> {
        let proposed = uuid::Uuid::new_v4().to_string();
        self.acquire_with_id(blob, &proposed).await
    }

    /// Acquire an infinite lease under a specific id.
    ///
    /// Re-acquiring with the id already holding the lease succeeds.
    #[tracing::instrument(
        name = "lease.acquire",
        skip(self, lease_id),
        fields(container = %self.container, blob = %blob),
        err
    )]
    pub async fn acquire_with_id(&self, blob: &str, lease_id: &str) -> Result<String, StorageError> {
        let result = self
            .backend
            .acquire_lease(&self.container, blob, lease_id)
            .await
            .map_err(translate);
        metrics::record_lease_operation("acquire", result.is_ok());

        let lease_id = result?;
        tracing::debug!(lease_id = %lease_id, "Lease acquired");
        Ok(lease_id)
    }

    /// Release a lease previously acquired under `lease_id`
    #[tracing::instrument(
        name = "lease.release",
        skip(self, lease_id),
        fields(container = %self.container, blob = %blob),
        err
    )]
    pub async fn release(&self, blob: &str, lease_id: &str) -> Result<(), StorageError> {
        let result = self
            .backend
            .release_lease(&self.container, blob, lease_id)
            .await
            .map_err(translate);
        metrics::record_lease_operation("release", result.is_ok());

        result?;
        tracing::debug!(lease_id = %lease_id, "Lease released");
        Ok(())
    }

    /// Use the caller's lease, or acquire one owned by the returned scope
    pub async fn scope(&self, blob: &str, lease_id: Option<&str>) -> Result<LeaseScope, StorageError> {
        match lease_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(LeaseScope::Borrowed(id.to_string())),
            None => {
                let lease_id = self.acquire(blob).await?;
                Ok(LeaseScope::Owned(OwnedLease {
                    manager: self.clone(),
                    blob: blob.to_string(),
                    lease_id,
                    released: false,
                }))
            }
        }
    }
}

/// Lease responsibility for the duration of one operation
pub enum LeaseScope {
    Owned(OwnedLease),
    Borrowed(String),
}

impl LeaseScope {
    pub fn lease_id(&self) -> &str {
        match self {
            LeaseScope::Owned(lease) => &lease.lease_id,
            LeaseScope::Borrowed(id) => id,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, LeaseScope::Owned(_))
    }

    /// End the scope: release an owned lease, leave a borrowed one alone
    pub async fn finish(self) -> Result<(), StorageError> {
        match self {
            LeaseScope::Owned(lease) => lease.release().await,
            LeaseScope::Borrowed(_) => Ok(()),
        }
    }
}

/// Lease acquired by the current operation
pub struct OwnedLease {
    manager: LeaseManager,
    blob: String,
    lease_id: String,
    released: bool,
}

impl OwnedLease {
    async fn release(mut self) -> Result<(), StorageError> {
        // Flag only once the call resolves; a drop mid-await falls back to Drop
        let result = self.manager.release(&self.blob, &self.lease_id).await;
        self.released = true;
        result
    }
}

impl Drop for OwnedLease {
    /// An owned lease dropped without `finish` belongs to a cancelled future.
    /// Hand the release to the runtime so the blob is not left leased.
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let blob = std::mem::take(&mut self.blob);
        let lease_id = std::mem::take(&mut self.lease_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    container = %manager.container,
                    blob = %blob,
                    "Owned lease dropped before release, releasing in background"
                );
                handle.spawn(async move {
                    if let Err(e) = manager.release(&blob, &lease_id).await {
                        tracing::error!(blob = %blob, error = %e, "Background lease release failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    container = %manager.container,
                    blob = %blob,
                    lease_id = %lease_id,
                    "Owned lease dropped outside a runtime; blob stays leased"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, MemoryBackend};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Memory backend whose first lease release never completes
    struct StalledRelease {
        inner: Arc<MemoryBackend>,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl BlobBackend for StalledRelease {
        fn account(&self) -> &str {
            self.inner.account()
        }

        fn max_block_size(&self) -> usize {
            self.inner.max_block_size()
        }

        async fn container_exists(&self, container: &str) -> BackendResult<bool> {
            self.inner.container_exists(container).await
        }

        async fn exists(&self, container: &str, blob: &str) -> BackendResult<bool> {
            self.inner.exists(container, blob).await
        }

        async fn create_append_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
            self.inner.create_append_blob(container, blob).await
        }

        async fn append_block(
            &self,
            container: &str,
            blob: &str,
            data: Bytes,
            lease_id: Option<&str>,
        ) -> BackendResult<()> {
            self.inner.append_block(container, blob, data, lease_id).await
        }

        async fn acquire_lease(
            &self,
            container: &str,
            blob: &str,
            proposed_id: &str,
        ) -> BackendResult<String> {
            self.inner.acquire_lease(container, blob, proposed_id).await
        }

        async fn release_lease(&self, container: &str, blob: &str, lease_id: &str) -> BackendResult<()> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.release_lease(container, blob, lease_id).await
        }

        async fn delete_if_exists(
            &self,
            container: &str,
            blob: &str,
            lease_id: Option<&str>,
        ) -> BackendResult<()> {
            self.inner.delete_if_exists(container, blob, lease_id).await
        }

        async fn create_if_absent(&self, container: &str, blob: &str, data: Bytes) -> BackendResult<()> {
            self.inner.create_if_absent(container, blob, data).await
        }
    }

    async fn setup() -> (Arc<MemoryBackend>, LeaseManager) {
        let backend = Arc::new(MemoryBackend::new("acct", 16).with_container("c"));
        backend.create_append_blob("c", "b").await.unwrap();
        let manager = LeaseManager::new(backend.clone(), "c");
        (backend, manager)
    }

    #[tokio::test]
    async fn test_acquire_then_busy() {
        let (backend, manager) = setup().await;

        let lease = manager.acquire("b").await.unwrap();
        assert_eq!(backend.lease_of("c", "b"), Some(lease.clone()));

        let second = manager.acquire("b").await;
        assert!(matches!(second, Err(StorageError::Busy(_))));

        manager.release("b", &lease).await.unwrap();
        assert_eq!(backend.lease_of("c", "b"), None);
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_fails() {
        let (_backend, manager) = setup().await;
        manager.acquire("b").await.unwrap();

        let result = manager.release("b", "not-the-lease").await;
        assert!(matches!(result, Err(StorageError::Busy(_))));
    }

    #[tokio::test]
    async fn test_acquire_missing_blob_is_not_found() {
        let (_backend, manager) = setup().await;
        let result = manager.acquire("missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_borrowed_scope_is_not_released() {
        let (backend, manager) = setup().await;
        let lease = manager.acquire("b").await.unwrap();

        let scope = manager.scope("b", Some(&lease)).await.unwrap();
        assert!(!scope.is_owned());
        assert_eq!(scope.lease_id(), lease);
        scope.finish().await.unwrap();

        assert_eq!(backend.lease_of("c", "b"), Some(lease));
    }

    #[tokio::test]
    async fn test_empty_lease_id_means_owned() {
        let (backend, manager) = setup().await;

        let scope = manager.scope("b", Some("")).await.unwrap();
        assert!(scope.is_owned());
        assert!(backend.lease_of("c", "b").is_some());

        scope.finish().await.unwrap();
        assert_eq!(backend.lease_of("c", "b"), None);
    }

    #[tokio::test]
    async fn test_dropped_owned_scope_releases_in_background() {
        let (backend, manager) = setup().await;

        let scope = manager.scope("b", None).await.unwrap();
        drop(scope);

        for _ in 0..50 {
            if backend.lease_of("c", "b").is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.lease_of("c", "b"), None);
    }

    #[tokio::test]
    async fn test_finish_dropped_mid_release_still_releases() {
        let (backend, _) = setup().await;
        let stalled = Arc::new(StalledRelease {
            inner: backend.clone(),
            stalled: AtomicBool::new(false),
        });
        let manager = LeaseManager::new(stalled, "c");

        let scope = manager.scope("b", None).await.unwrap();
        let finished = tokio::time::timeout(Duration::from_millis(50), scope.finish()).await;
        assert!(finished.is_err());

        for _ in 0..50 {
            if backend.lease_of("c", "b").is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.lease_of("c", "b"), None);
    }
}
