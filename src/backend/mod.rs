//! Blob backend module
//!
//! The append writer never talks to storage directly; it goes through the
//! [`BlobBackend`] trait, one instance per storage account.
//!
//! # Implementations
//!
//! - [`AzureBackend`] - Azure Blob REST API over `reqwest` with Shared Key auth
//! - [`MemoryBackend`] - in-process emulation with the same lease semantics
//!
//! Backends report failures as raw [`BackendError`] values. Mapping them to
//! domain errors happens once, in the container layer.

use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;

pub mod azure;
pub mod memory;
pub mod signing;

pub use azure::{AzureBackend, AzureBackendConfig};
pub use memory::MemoryBackend;

/// Result type for raw backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Account-scoped operations consumed from the backing store.
///
/// Every call is a single network round trip. Implementations must be safe to
/// share between tasks.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Account name, used in logs and metrics
    fn account(&self) -> &str;

    /// Largest payload a single [`append_block`](Self::append_block) accepts
    fn max_block_size(&self) -> usize;

    /// Whether the container exists in this account
    async fn container_exists(&self, container: &str) -> BackendResult<bool>;

    /// Whether the blob exists
    async fn exists(&self, container: &str, blob: &str) -> BackendResult<bool>;

    /// Create an empty append blob only if no blob exists under that name.
    ///
    /// Fails with a `BlobAlreadyExists` code when the blob is already there.
    async fn create_append_blob(&self, container: &str, blob: &str) -> BackendResult<()>;

    /// Commit `data` as one block at the end of the blob
    async fn append_block(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        lease_id: Option<&str>,
    ) -> BackendResult<()>;

    /// Acquire an infinite lease, proposing `proposed_id` as its id
    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        proposed_id: &str,
    ) -> BackendResult<String>;

    /// Release a lease held under `lease_id`
    async fn release_lease(&self, container: &str, blob: &str, lease_id: &str)
        -> BackendResult<()>;

    /// Delete the blob if present; `lease_id` satisfies delete-under-lease
    async fn delete_if_exists(
        &self,
        container: &str,
        blob: &str,
        lease_id: Option<&str>,
    ) -> BackendResult<()>;

    /// Create a small blob only if no blob exists under that name.
    ///
    /// Fails with a `BlobAlreadyExists` code when the condition is not met.
    async fn create_if_absent(&self, container: &str, blob: &str, data: Bytes)
        -> BackendResult<()>;
}
