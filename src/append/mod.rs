//! Buffered append uploader
//!
//! Turns an arbitrary-length byte stream into an ordered sequence of
//! append-block calls, each no larger than the backend's block ceiling.
//!
//! # Flow
//!
//! 1. Create the blob empty if it does not exist
//! 2. Borrow the caller's lease, or acquire one owned by this call
//! 3. Assemble blocks with [`AppendBuffer`] and flush them one at a time
//! 4. Release an owned lease on every exit path
//!
//! A failed append leaves whatever prefix was already committed in place.

pub mod buffer;

pub use buffer::AppendBuffer;

use crate::backend::BlobBackend;
use crate::error::{translate, StorageError};
use crate::lease::LeaseManager;
use crate::metrics;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// What an append committed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Number of append-block calls issued
    pub blocks: usize,
    /// Total bytes committed
    pub bytes: u64,
}

/// Sequential block uploader for one container
#[derive(Clone)]
pub struct BlockUploader {
    backend: Arc<dyn BlobBackend>,
    container: String,
    leases: LeaseManager,
}

impl BlockUploader {
    pub fn new(backend: Arc<dyn BlobBackend>, container: &str) -> Self {
        let leases = LeaseManager::new(backend.clone(), container);
        Self {
            backend,
            container: container.to_string(),
            leases,
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.backend.max_block_size()
    }

    /// Append the whole stream to `blob`.
    ///
    /// An empty or missing `lease_id` makes this call acquire and release its
    /// own lease. A supplied lease is used as-is and left held.
    #[tracing::instrument(
        name = "append.blob",
        skip(self, input, lease_id, cancel),
        fields(
            container = %self.container,
            blob = %blob,
            lease.borrowed = has_lease(lease_id),
            append.blocks = tracing::field::Empty,
            append.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn append<S>(
        &self,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let start = Instant::now();

        let result = match self.ensure_exists(blob).await {
            Ok(()) => self.upload(blob, input, lease_id, cancel).await,
            Err(e) => Err(e),
        };

        self.finish_metrics("append", start, &result);
        result
    }

    /// Replace the content of `blob` with the stream.
    ///
    /// Deletes the blob (under `lease_id` when given) and recreates it through
    /// the append path. With a caller lease, the lease is re-acquired under
    /// the same id on the new blob so the caller still holds it afterwards.
    /// Readers can observe the blob missing in between.
    #[tracing::instrument(
        name = "append.truncate",
        skip(self, input, lease_id, cancel),
        fields(
            container = %self.container,
            blob = %blob,
            lease.borrowed = has_lease(lease_id),
            append.blocks = tracing::field::Empty,
            append.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn truncate<S>(
        &self,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let start = Instant::now();
        let lease_id = lease_id.filter(|id| !id.is_empty());

        let result = match self.recreate(blob, lease_id).await {
            Ok(()) => self.upload(blob, input, lease_id, cancel).await,
            Err(e) => Err(e),
        };

        self.finish_metrics("truncate", start, &result);
        result
    }

    async fn recreate(&self, blob: &str, lease_id: Option<&str>) -> Result<(), StorageError> {
        self.backend
            .delete_if_exists(&self.container, blob, lease_id)
            .await
            .map_err(translate)?;
        tracing::debug!(blob = %blob, "Deleted blob for truncate");

        self.ensure_exists(blob).await?;

        if let Some(id) = lease_id {
            self.leases.acquire_with_id(blob, id).await?;
        }
        Ok(())
    }

    /// Create the blob empty unless it is already there
    async fn ensure_exists(&self, blob: &str) -> Result<(), StorageError> {
        let exists = self
            .backend
            .exists(&self.container, blob)
            .await
            .map_err(translate)?;
        if exists {
            return Ok(());
        }

        match self
            .backend
            .create_append_blob(&self.container, blob)
            .await
            .map_err(translate)
        {
            Ok(()) => {
                tracing::debug!(blob = %blob, "Created append blob");
                Ok(())
            }
            // Another writer created it first
            Err(StorageError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Lease scope around the flush loop
    async fn upload<S>(
        &self,
        blob: &str,
        mut input: S,
        lease_id: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let scope = self.leases.scope(blob, lease_id).await?;

        let uploaded = self
            .flush_blocks(blob, &mut input, scope.lease_id(), cancel)
            .await;
        let released = scope.finish().await;

        match (uploaded, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(
                    blob = %blob,
                    error = %release_err,
                    "Lease release failed after append failure"
                );
                Err(e)
            }
        }
    }

    async fn flush_blocks<S>(
        &self,
        blob: &str,
        input: &mut S,
        lease_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let mut buffer = AppendBuffer::new(self.backend.max_block_size());
        let mut outcome = AppendOutcome::default();

        while let Some(block) = buffer.next_block(input).await? {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(
                    blob = %blob,
                    blocks = outcome.blocks,
                    "Append cancelled between blocks"
                );
                return Err(StorageError::Cancelled);
            }

            let size = block.len();
            self.backend
                .append_block(&self.container, blob, block, Some(lease_id))
                .await
                .map_err(translate)?;

            metrics::record_block_appended(size);
            outcome.blocks += 1;
            outcome.bytes += size as u64;

            tracing::trace!(
                blob = %blob,
                block = outcome.blocks,
                size = size,
                "Appended block"
            );
        }

        Ok(outcome)
    }

    fn finish_metrics(
        &self,
        mode: &str,
        start: Instant,
        result: &Result<AppendOutcome, StorageError>,
    ) {
        metrics::record_append_duration(&self.container, mode, start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                let span = tracing::Span::current();
                span.record("append.blocks", outcome.blocks);
                span.record("append.bytes", outcome.bytes);
                metrics::record_append_success(&self.container, outcome.bytes);
            }
            Err(e) => {
                metrics::record_append_failure(&self.container);
                metrics::record_error(e.kind());
            }
        }
    }
}

fn has_lease(lease_id: Option<&str>) -> bool {
    lease_id.is_some_and(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use futures::stream;

    fn reads(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Unpin + Send {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn setup(max_block_size: usize) -> (Arc<MemoryBackend>, BlockUploader) {
        let backend = Arc::new(MemoryBackend::new("acct", max_block_size).with_container("c"));
        let uploader = BlockUploader::new(backend.clone(), "c");
        (backend, uploader)
    }

    #[tokio::test]
    async fn test_append_creates_missing_blob() {
        let (backend, uploader) = setup(8);

        let outcome = uploader
            .append("log", reads(&[b"abc"]), None, None)
            .await
            .unwrap();

        assert_eq!(outcome, AppendOutcome { blocks: 1, bytes: 3 });
        assert_eq!(backend.contents("c", "log"), Some(b"abc".to_vec()));
        assert_eq!(backend.lease_of("c", "log"), None);
    }

    #[tokio::test]
    async fn test_append_extends_existing_blob() {
        let (backend, uploader) = setup(8);

        uploader.append("log", reads(&[b"abc"]), None, None).await.unwrap();
        uploader.append("log", reads(&[b"def"]), None, None).await.unwrap();

        assert_eq!(backend.contents("c", "log"), Some(b"abcdef".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_stream_creates_blob_without_appends() {
        let (backend, uploader) = setup(8);

        let outcome = uploader.append("log", reads(&[]), None, None).await.unwrap();

        assert_eq!(outcome, AppendOutcome::default());
        assert_eq!(backend.contents("c", "log"), Some(Vec::new()));
        assert!(backend.append_calls().is_empty());
        assert_eq!(backend.lease_of("c", "log"), None);
    }

    #[tokio::test]
    async fn test_owned_lease_released_on_failure() {
        let (backend, uploader) = setup(4);
        backend.fail_appends_from(1);

        let result = uploader
            .append("log", reads(&[b"abcd", b"efgh", b"ijkl"]), None, None)
            .await;

        assert!(matches!(result, Err(StorageError::Unexpected(_))));
        // First block committed, second rejected, third never sent
        assert_eq!(backend.append_calls().len(), 2);
        assert_eq!(backend.contents("c", "log"), Some(b"abcd".to_vec()));
        assert_eq!(backend.lease_of("c", "log"), None);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_block() {
        let (backend, uploader) = setup(8);
        let token = CancellationToken::new();
        token.cancel();

        let result = uploader
            .append("log", reads(&[b"abc"]), None, Some(&token))
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(backend.append_calls().is_empty());
        assert_eq!(backend.lease_of("c", "log"), None);
    }

    #[tokio::test]
    async fn test_truncate_without_lease_replaces_content() {
        let (backend, uploader) = setup(8);
        uploader.append("log", reads(&[b"old data"]), None, None).await.unwrap();

        uploader.truncate("log", reads(&[b"new"]), None, None).await.unwrap();

        assert_eq!(backend.contents("c", "log"), Some(b"new".to_vec()));
        assert_eq!(backend.lease_of("c", "log"), None);
    }

    #[tokio::test]
    async fn test_truncate_keeps_caller_lease() {
        let (backend, uploader) = setup(8);
        uploader.append("log", reads(&[b"old"]), None, None).await.unwrap();
        let lease = backend.acquire_lease("c", "log", "caller-lease").await.unwrap();

        uploader
            .truncate("log", reads(&[b"fresh"]), Some(&lease), None)
            .await
            .unwrap();

        assert_eq!(backend.contents("c", "log"), Some(b"fresh".to_vec()));
        assert_eq!(backend.lease_of("c", "log"), Some(lease));
    }
}
