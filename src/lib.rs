//! Kasane Appendr Library
//!
//! Lease-guarded, block-bounded writer for append-only blob stores.
//!
//! # Features
//!
//! - **Bounded Blocks**: Arbitrary-length streams become append blocks that
//!   never exceed the backend's ceiling, without splitting a single read
//! - **Lease Discipline**: Leases acquired by an append are always released;
//!   leases supplied by the caller are never touched
//! - **Advisory Locks**: `<blob>.LOCK` marker objects, independent of leases
//! - **Routing**: Account/container registry with cached connections
//!
//! # Example
//!
//! ```no_run
//! use kasane_appendr::{config::Config, registry::BlobStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let storage = BlobStorage::new(&config)?;
//!
//!     let lease = storage.acquire_lease("prodlogs", "app", "today.log").await?;
//!     let data: &[u8] = b"first line\n";
//!     storage
//!         .append_reader("prodlogs", "app", "today.log", data, Some(&lease))
//!         .await?;
//!     storage.release_lease("prodlogs", "app", "today.log", &lease).await?;
//!     Ok(())
//! }
//! ```

pub mod append;
pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod lease;
pub mod lockfile;
pub mod metrics;
pub mod registry;
pub mod telemetry;

// Re-export commonly used types
pub use append::AppendOutcome;
pub use config::Config;
pub use container::ContainerConnection;
pub use error::StorageError;
pub use registry::BlobStorage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
