//! Error types for the sync layer.

use chainlog_crdt::CrdtError;
use chainlog_store::StorageError;
use chainlog_types::PeerId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in replication and discovery.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// The peer sent something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with an error message.
    #[error("peer rejected request ({code}): {reason}")]
    Rejected { code: u32, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A log entry is not a valid CRDT operation.
    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),

    /// Pulled entries failed hash-chain or proof verification.
    #[error("corrupt batch at index {index}: {reason}")]
    Corruption { index: u64, reason: String },

    /// Peer not found.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The rendezvous service could not be reached.
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),
}

impl SyncError {
    /// Returns true for failures worth retrying from the last checkpoint.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::ChannelClosed | Self::DiscoveryUnavailable(_)
        )
    }

    /// Lifts storage corruption into the sync taxonomy.
    pub(crate) fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::Corruption { index, reason } => Self::Corruption { index, reason },
            other => Self::Storage(other),
        }
    }
}
