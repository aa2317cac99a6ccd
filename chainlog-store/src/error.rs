//! Error types for the storage layer.

use chainlog_types::IdentityKey;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested index is at or past the log's length.
    #[error("index {index} out of range for log of length {length}")]
    OutOfRange { index: u64, length: u64 },

    /// The log has reached its configured maximum length.
    #[error("log is full ({max} entries)")]
    CapacityExceeded { max: u64 },

    /// The log or its corestore has been closed.
    #[error("log store is closed")]
    Closed,

    /// Local append on a log this process cannot sign for.
    #[error("log {0} is a read-only replica")]
    ReadOnly(String),

    /// A hash, link or proof failed to verify.
    #[error("chain corruption at index {index}: {reason}")]
    Corruption { index: u64, reason: String },

    /// The name is already bound to another writer's key.
    #[error("log {name} is bound to identity {existing}, not {requested}")]
    IdentityMismatch {
        name: String,
        existing: IdentityKey,
        requested: IdentityKey,
    },

    /// No log with this name exists.
    #[error("unknown log: {0}")]
    UnknownLog(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted data that cannot be interpreted.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub(crate) fn corruption(index: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            index,
            reason: reason.into(),
        }
    }
}
