//! Error translation
//!
//! Every backend reports failures as a [`BackendError`]: an HTTP-ish status,
//! the service's error code and a message. [`translate`] is the single place
//! where that shape is inspected and mapped onto the closed [`StorageError`]
//! taxonomy. Nothing above the container boundary looks at backend codes.

use std::fmt;
use thiserror::Error;

/// Raw failure reported by a blob backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// HTTP status code, when the failure came from a response
    pub status: Option<u16>,
    /// Service error code (`x-ms-error-code` or `<Code>` in the body)
    pub code: Option<String>,
    pub message: String,
}

impl BackendError {
    /// Error carrying a service status and code
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Error that never reached the service (connect, signing, I/O)
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, "HTTP {} {}: {}", status, code, self.message),
            (Some(status), None) => write!(f, "HTTP {}: {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Domain errors surfaced by every storage operation
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // Inner error is part of the message, not a chained source
    #[error("Unexpected backend error: {0}")]
    Unexpected(BackendError),

    #[error("Failed to read input stream: {0}")]
    Read(std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::Busy(_) => "busy",
            StorageError::LimitExceeded(_) => "limit_exceeded",
            StorageError::AlreadyExists(_) => "already_exists",
            StorageError::Unexpected(_) => "unexpected",
            StorageError::Read(_) => "read",
            StorageError::Cancelled => "cancelled",
        }
    }
}

const NOT_FOUND_CODES: &[&str] = &["BlobNotFound", "ContainerNotFound", "ResourceNotFound"];

const BUSY_CODES: &[&str] = &[
    "LeaseAlreadyPresent",
    "LeaseIdMismatchWithLeaseOperation",
    "LeaseIdMismatchWithBlobOperation",
    "LeaseIdMissing",
    "LeaseNotPresentWithBlobOperation",
    "LeaseNotPresentWithLeaseOperation",
    "LeaseIsBreakingAndCannotBeAcquired",
    "LeaseLost",
];

const LIMIT_CODES: &[&str] = &[
    "BlockCountExceedsLimit",
    "RequestBodyTooLarge",
    "MaxBlobSizeConditionNotMet",
];

const ALREADY_EXISTS_CODES: &[&str] = &["BlobAlreadyExists"];

/// Map a backend failure onto the domain taxonomy.
///
/// Codes win over status: a 409 can mean a lease conflict or a conditional
/// create that lost. Unrecognised failures pass through unchanged.
pub fn translate(err: BackendError) -> StorageError {
    if let Some(code) = err.code.as_deref() {
        if NOT_FOUND_CODES.contains(&code) {
            return StorageError::NotFound(err.message);
        }
        if BUSY_CODES.contains(&code) {
            return StorageError::Busy(err.message);
        }
        if LIMIT_CODES.contains(&code) {
            return StorageError::LimitExceeded(err.message);
        }
        if ALREADY_EXISTS_CODES.contains(&code) {
            return StorageError::AlreadyExists(err.message);
        }
    }

    match err.status {
        Some(404) => StorageError::NotFound(err.message),
        Some(413) => StorageError::LimitExceeded(err.message),
        _ => StorageError::Unexpected(err),
    }
}
