//! Sync error types.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while configuring or running sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync is not configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device is offline")]
    Offline,

    #[error("backend operation failed: {0}")]
    Backend(String),

    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("provider credentials expired, re-authentication required")]
    AuthExpired,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("integrity check failed: snapshot claims checksum {expected}, content hashes to {actual}")]
    Integrity { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] huddle_storage::StorageError),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Coarse classification used by callers deciding how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid sync configuration.
    Configuration,
    /// The device has no connectivity.
    Connectivity,
    /// Transport or auth failure inside a backend adapter.
    Backend,
    /// Downloaded payload failed its checksum.
    Integrity,
    /// Local storage, serialization or runtime failure.
    Local,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotConfigured | SyncError::Config(_) => ErrorKind::Configuration,
            SyncError::Offline => ErrorKind::Connectivity,
            SyncError::Backend(_)
            | SyncError::S3(_)
            | SyncError::Api(_)
            | SyncError::AuthExpired
            | SyncError::AuthFailed(_)
            | SyncError::AuthRequired
            | SyncError::Http(_) => ErrorKind::Backend,
            SyncError::Integrity { .. } => ErrorKind::Integrity,
            SyncError::Serialization(_) | SyncError::Storage(_) | SyncError::Task(_) => {
                ErrorKind::Local
            }
        }
    }

    /// True when the user has to sign in to the provider again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired)
    }

    /// True for HTTP 429 responses.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SyncError::Http(e) => e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}
