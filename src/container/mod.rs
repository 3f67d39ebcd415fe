//! Container connection
//!
//! [`ContainerConnection`] is the per-container surface: append, truncate,
//! lease and lock-file operations on blobs inside one remote container. It is
//! also the boundary where backend failures become [`StorageError`]s.

use crate::append::{AppendOutcome, BlockUploader};
use crate::backend::BlobBackend;
use crate::error::{translate, StorageError};
use crate::lease::LeaseManager;
use crate::lockfile::LockFileManager;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Handle to one container of one account
#[derive(Clone)]
pub struct ContainerConnection {
    name: String,
    account: String,
    uploader: BlockUploader,
    leases: LeaseManager,
    locks: LockFileManager,
}

impl std::fmt::Debug for ContainerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerConnection")
            .field("account", &self.account)
            .field("name", &self.name)
            .finish()
    }
}

impl ContainerConnection {
    /// Open a connection, failing with `NotFound` if the container is absent
    #[tracing::instrument(
        name = "container.connect",
        skip(backend),
        fields(account = %backend.account(), container = %name),
        err
    )]
    pub async fn connect(backend: Arc<dyn BlobBackend>, name: &str) -> Result<Self, StorageError> {
        let exists = backend.container_exists(name).await.map_err(translate)?;
        if !exists {
            return Err(StorageError::NotFound(format!(
                "container {} does not exist in account {}",
                name,
                backend.account()
            )));
        }

        tracing::info!("Connected to container");
        Ok(Self::new_unchecked(backend, name))
    }

    /// Build a connection without probing the backend
    pub fn new_unchecked(backend: Arc<dyn BlobBackend>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            account: backend.account().to_string(),
            uploader: BlockUploader::new(backend.clone(), name),
            leases: LeaseManager::new(backend.clone(), name),
            locks: LockFileManager::new(backend, name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn max_block_size(&self) -> usize {
        self.uploader.max_block_size()
    }

    /// Append a chunk stream to `blob`
    pub async fn append_blob<S>(
        &self,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.uploader.append(blob, input, lease_id, None).await
    }

    /// Append, stopping between blocks once `cancel` fires
    pub async fn append_blob_with_cancel<S>(
        &self,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.uploader.append(blob, input, lease_id, Some(cancel)).await
    }

    /// Append everything readable from `reader`.
    ///
    /// Reads are capped at the block ceiling so no single read can exceed it.
    pub async fn append_reader<R>(
        &self,
        blob: &str,
        reader: R,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let input = ReaderStream::with_capacity(reader, self.max_block_size());
        self.append_blob(blob, input, lease_id).await
    }

    /// Delete `blob` and recreate it with the stream's content
    pub async fn truncate_blob<S>(
        &self,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.uploader.truncate(blob, input, lease_id, None).await
    }

    pub async fn truncate_reader<R>(
        &self,
        blob: &str,
        reader: R,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let input = ReaderStream::with_capacity(reader, self.max_block_size());
        self.truncate_blob(blob, input, lease_id).await
    }

    /// Acquire an infinite lease; `Busy` if another holder has one
    pub async fn acquire_lease(&self, blob: &str) -> Result<String, StorageError> {
        self.leases.acquire(blob).await
    }

    pub async fn release_lease(&self, blob: &str, lease_id: &str) -> Result<(), StorageError> {
        self.leases.release(blob, lease_id).await
    }

    /// Create `<blob>.LOCK`; `AlreadyExists` if present
    pub async fn create_lock_file(&self, blob: &str) -> Result<(), StorageError> {
        self.locks.create(blob).await
    }

    pub async fn delete_lock_file(&self, blob: &str) -> Result<(), StorageError> {
        self.locks.delete(blob).await
    }

    pub async fn is_locked(&self, blob: &str) -> Result<bool, StorageError> {
        self.locks.is_locked(blob).await
    }
}
