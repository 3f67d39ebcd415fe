//! In-memory blob backend
//!
//! Emulates an append-blob service in process: containers, append blobs,
//! infinite leases with proposed ids, delete-under-lease, conditional creates
//! and a block-size ceiling. Failures use the same status/code pairs the
//! Azure service returns so they travel through the same translation path.
//!
//! The backend also keeps a log of every block-append call and can inject
//! failures, which makes it the workhorse of the test suite.
//!
//! # Example
//!
//! ```
//! use kasane_appendr::backend::{BlobBackend, MemoryBackend};
//!
//! # async fn example() {
//! let backend = MemoryBackend::new("devaccount", 8).with_container("logs");
//! backend.create_append_blob("logs", "app.log").await.unwrap();
//! assert_eq!(backend.contents("logs", "app.log"), Some(Vec::new()));
//! # }
//! ```

use super::{BackendResult, BlobBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct StoredBlob {
    data: Vec<u8>,
    lease: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, HashMap<String, StoredBlob>>,
    appends: Vec<AppendCall>,
    lease_log: Vec<LeaseEvent>,
    fail_appends_from: Option<usize>,
    denied: HashSet<String>,
    container_probes: usize,
}

/// One recorded block-append call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCall {
    pub container: String,
    pub blob: String,
    pub data: Bytes,
    pub lease_id: Option<String>,
}

/// Lease lifecycle event, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    Acquired { blob: String, lease_id: String },
    Released { blob: String, lease_id: String },
}

/// In-process backend
#[derive(Debug)]
pub struct MemoryBackend {
    account: String,
    max_block_size: usize,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create an empty backend with the given block ceiling
    pub fn new(account: &str, max_block_size: usize) -> Self {
        Self {
            account: account.to_string(),
            max_block_size,
            state: Mutex::new(State::default()),
        }
    }

    /// Register a container
    pub fn with_container(self, container: &str) -> Self {
        self.add_container(container);
        self
    }

    pub fn add_container(&self, container: &str) {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default();
    }

    /// Make every append call numbered `n` (0-based) or later fail
    pub fn fail_appends_from(&self, n: usize) {
        self.state.lock().fail_appends_from = Some(n);
    }

    /// Make every call touching `blob` fail with an authorization error
    pub fn deny_blob(&self, blob: &str) {
        self.state.lock().denied.insert(blob.to_string());
    }

    /// Current content of a blob
    pub fn contents(&self, container: &str, blob: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(blob))
            .map(|b| b.data.clone())
    }

    /// Lease currently held on a blob
    pub fn lease_of(&self, container: &str, blob: &str) -> Option<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(blob))
            .and_then(|b| b.lease.clone())
    }

    /// Every block-append call received so far, in order
    pub fn append_calls(&self) -> Vec<AppendCall> {
        self.state.lock().appends.clone()
    }

    /// Every lease acquisition and release, in order
    pub fn lease_events(&self) -> Vec<LeaseEvent> {
        self.state.lock().lease_log.clone()
    }

    /// Number of container existence checks served so far
    pub fn container_probes(&self) -> usize {
        self.state.lock().container_probes
    }

    fn not_found(container: &str, blob: &str) -> BackendError {
        BackendError::service(
            404,
            "BlobNotFound",
            format!("The specified blob {}/{} does not exist.", container, blob),
        )
    }

    fn container_not_found(container: &str) -> BackendError {
        BackendError::service(
            404,
            "ContainerNotFound",
            format!("The specified container {} does not exist.", container),
        )
    }

    fn check_denied(state: &State, blob: &str) -> BackendResult<()> {
        if state.denied.contains(blob) {
            return Err(BackendError::service(
                403,
                "AuthorizationPermissionMismatch",
                "This request is not authorized to perform this operation.",
            ));
        }
        Ok(())
    }

    /// Check the lease condition of a write against a stored blob
    fn check_write_lease(stored: &StoredBlob, lease_id: Option<&str>) -> BackendResult<()> {
        match (stored.lease.as_deref(), lease_id) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(BackendError::service(
                412,
                "LeaseIdMissing",
                "There is currently a lease on the blob and no lease ID was specified in the request.",
            )),
            (None, Some(_)) => Err(BackendError::service(
                412,
                "LeaseNotPresentWithBlobOperation",
                "There is currently no lease on the blob.",
            )),
            (Some(held), Some(given)) if held == given => Ok(()),
            (Some(_), Some(_)) => Err(BackendError::service(
                412,
                "LeaseIdMismatchWithBlobOperation",
                "The lease ID specified did not match the lease ID for the blob.",
            )),
        }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn account(&self) -> &str {
        &self.account
    }

    fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    async fn container_exists(&self, container: &str) -> BackendResult<bool> {
        let mut state = self.state.lock();
        state.container_probes += 1;
        Ok(state.containers.contains_key(container))
    }

    async fn exists(&self, container: &str, blob: &str) -> BackendResult<bool> {
        let state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let blobs = state
            .containers
            .get(container)
            .ok_or_else(|| Self::container_not_found(container))?;
        Ok(blobs.contains_key(blob))
    }

    async fn create_append_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?;

        if blobs.contains_key(blob) {
            return Err(BackendError::service(
                409,
                "BlobAlreadyExists",
                "The specified blob already exists.",
            ));
        }
        blobs.insert(blob.to_string(), StoredBlob::default());
        Ok(())
    }

    async fn append_block(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        lease_id: Option<&str>,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;

        let call_index = state.appends.len();
        state.appends.push(AppendCall {
            container: container.to_string(),
            blob: blob.to_string(),
            data: data.clone(),
            lease_id: lease_id.map(str::to_string),
        });

        if matches!(state.fail_appends_from, Some(n) if call_index >= n) {
            return Err(BackendError::service(
                500,
                "InternalError",
                "The server encountered an internal error. Please retry the request.",
            ));
        }

        if data.len() > self.max_block_size {
            return Err(BackendError::service(
                413,
                "RequestBodyTooLarge",
                format!(
                    "The request body is too large and exceeds the maximum permissible limit of {} bytes.",
                    self.max_block_size
                ),
            ));
        }

        let stored = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?
            .get_mut(blob)
            .ok_or_else(|| Self::not_found(container, blob))?;

        Self::check_write_lease(stored, lease_id)?;
        stored.data.extend_from_slice(&data);
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        proposed_id: &str,
    ) -> BackendResult<String> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let stored = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?
            .get_mut(blob)
            .ok_or_else(|| Self::not_found(container, blob))?;

        match stored.lease.clone() {
            // Re-acquiring with the held id renews it
            Some(held) if held == proposed_id => {}
            Some(_) => {
                return Err(BackendError::service(
                    409,
                    "LeaseAlreadyPresent",
                    "There is already a lease present.",
                ))
            }
            None => stored.lease = Some(proposed_id.to_string()),
        }

        state.lease_log.push(LeaseEvent::Acquired {
            blob: blob.to_string(),
            lease_id: proposed_id.to_string(),
        });
        Ok(proposed_id.to_string())
    }

    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let stored = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?
            .get_mut(blob)
            .ok_or_else(|| Self::not_found(container, blob))?;

        match stored.lease.clone() {
            Some(held) if held == lease_id => stored.lease = None,
            Some(_) => {
                return Err(BackendError::service(
                    409,
                    "LeaseIdMismatchWithLeaseOperation",
                    "The lease ID specified did not match the lease ID for the blob.",
                ))
            }
            None => {
                return Err(BackendError::service(
                    409,
                    "LeaseNotPresentWithLeaseOperation",
                    "There is currently no lease on the blob.",
                ))
            }
        }

        state.lease_log.push(LeaseEvent::Released {
            blob: blob.to_string(),
            lease_id: lease_id.to_string(),
        });
        Ok(())
    }

    async fn delete_if_exists(
        &self,
        container: &str,
        blob: &str,
        lease_id: Option<&str>,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?;

        if let Some(stored) = blobs.get(blob) {
            Self::check_write_lease(stored, lease_id)?;
            blobs.remove(blob);
        }
        Ok(())
    }

    async fn create_if_absent(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_denied(&state, blob)?;
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Self::container_not_found(container))?;

        if blobs.contains_key(blob) {
            return Err(BackendError::service(
                409,
                "BlobAlreadyExists",
                "The specified blob already exists.",
            ));
        }

        blobs.insert(
            blob.to_string(),
            StoredBlob {
                data: data.to_vec(),
                lease: None,
            },
        );
        Ok(())
    }
}
