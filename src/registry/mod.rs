//! Account and container registry
//!
//! [`BlobStorage`] routes operations by account name; each [`Account`] keeps
//! a lazily filled map of container name to [`ContainerConnection`].
//!
//! # Design
//!
//! - One backend per configured account, created at startup
//! - Container connections created on first use and kept for process lifetime
//! - Lookups share a read lock; the write lock is held only to insert an
//!   empty per-container cell
//! - Each cell is filled at most once, so concurrent first uses yield a single
//!   connection while lookups of other containers proceed
//!
//! # Example
//!
//! ```no_run
//! use kasane_appendr::config::Config;
//! use kasane_appendr::registry::BlobStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let storage = BlobStorage::new(&config)?;
//!
//! let data: &[u8] = b"line\n";
//! storage.append_reader("prodlogs", "app", "today.log", data, None).await?;
//! # Ok(())
//! # }
//! ```

use crate::append::AppendOutcome;
use crate::backend::azure::AzureConfigError;
use crate::backend::{AzureBackend, AzureBackendConfig, BlobBackend};
use crate::config::{AccountConfig, Config};
use crate::container::ContainerConnection;
use crate::error::StorageError;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

/// Registry construction errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Account '{account}': {source}")]
    Backend {
        account: String,
        #[source]
        source: AzureConfigError,
    },

    #[error("Duplicate storage account '{0}'")]
    DuplicateAccount(String),
}

/// One storage account and its container connections
pub struct Account {
    name: String,
    backend: Arc<dyn BlobBackend>,
    containers: RwLock<HashMap<String, Arc<OnceCell<ContainerConnection>>>>,
}

impl Account {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self {
            name: backend.account().to_string(),
            backend,
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Build an Azure-backed account from configuration
    pub fn from_config(config: &AccountConfig) -> Result<Self, RegistryError> {
        let backend = AzureBackend::new(AzureBackendConfig {
            account: config.name.clone(),
            key: config.key.clone(),
            endpoint: config.endpoint.clone(),
            timeout_seconds: config.timeout_seconds,
        })
        .map_err(|source| RegistryError::Backend {
            account: config.name.clone(),
            source,
        })?;

        Ok(Self::new(Arc::new(backend)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection for `name`, created and cached on first use
    pub async fn container(&self, name: &str) -> Result<ContainerConnection, StorageError> {
        let existing = self.containers.read().await.get(name).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => self
                .containers
                .write()
                .await
                .entry(name.to_string())
                .or_default()
                .clone(),
        };

        // Map guard is released; only callers of this container wait here
        cell.get_or_try_init(|| async {
            let conn = ContainerConnection::connect(self.backend.clone(), name).await?;
            tracing::debug!(account = %self.name, container = %name, "Cached container connection");
            Ok::<_, StorageError>(conn)
        })
        .await
        .cloned()
    }

    /// Names of containers connected so far
    pub async fn connected_containers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .read()
            .await
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Name-routed entry point over every configured account
pub struct BlobStorage {
    accounts: HashMap<String, Arc<Account>>,
}

impl BlobStorage {
    /// Create one Azure-backed account per configured entry
    pub fn new(config: &Config) -> Result<Self, RegistryError> {
        let accounts = config
            .accounts
            .iter()
            .map(Account::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let storage = Self::from_accounts(accounts)?;

        tracing::info!(accounts = storage.accounts.len(), "Storage accounts registered");
        Ok(storage)
    }

    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for account in accounts {
            let name = account.name().to_string();
            if map.insert(name.clone(), Arc::new(account)).is_some() {
                return Err(RegistryError::DuplicateAccount(name));
            }
        }
        Ok(Self { accounts: map })
    }

    /// Registered account names, sorted
    pub fn account_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.accounts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn account(&self, name: &str) -> Result<&Arc<Account>, StorageError> {
        self.accounts
            .get(name)
            .ok_or_else(|| StorageError::NotFound(format!("unknown storage account {}", name)))
    }

    /// Container connection for `account`/`container`
    pub async fn resolve(&self, account: &str, container: &str) -> Result<ContainerConnection, StorageError> {
        self.account(account)?.container(container).await
    }

    pub async fn append_blob<S>(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.resolve(account, container)
            .await?
            .append_blob(blob, input, lease_id)
            .await
    }

    pub async fn append_blob_with_cancel<S>(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.resolve(account, container)
            .await?
            .append_blob_with_cancel(blob, input, lease_id, cancel)
            .await
    }

    pub async fn append_reader<R>(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        reader: R,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.resolve(account, container)
            .await?
            .append_reader(blob, reader, lease_id)
            .await
    }

    pub async fn truncate_blob<S>(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        input: S,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.resolve(account, container)
            .await?
            .truncate_blob(blob, input, lease_id)
            .await
    }

    pub async fn truncate_reader<R>(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        reader: R,
        lease_id: Option<&str>,
    ) -> Result<AppendOutcome, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.resolve(account, container)
            .await?
            .truncate_reader(blob, reader, lease_id)
            .await
    }

    pub async fn acquire_lease(&self, account: &str, container: &str, blob: &str) -> Result<String, StorageError> {
        self.resolve(account, container).await?.acquire_lease(blob).await
    }

    pub async fn release_lease(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> Result<(), StorageError> {
        self.resolve(account, container)
            .await?
            .release_lease(blob, lease_id)
            .await
    }

    pub async fn create_lock_file(&self, account: &str, container: &str, blob: &str) -> Result<(), StorageError> {
        self.resolve(account, container).await?.create_lock_file(blob).await
    }

    pub async fn delete_lock_file(&self, account: &str, container: &str, blob: &str) -> Result<(), StorageError> {
        self.resolve(account, container).await?.delete_lock_file(blob).await
    }
}
