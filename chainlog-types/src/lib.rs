//! Core type definitions for chainlog.
//!
//! This crate defines the leaf types shared by every other chainlog crate:
//! - Peer identifiers (UUID v7)
//! - SHA-256 digests used for hash chains and topic names
//! - Log identity keys (ed25519 public keys, stored as raw bytes)
//! - Hybrid Logical Clock timestamps
//!
//! Nothing in here knows about logs, replication, or CRDTs.

mod digest;
mod ids;
mod timestamp;

pub use digest::{Hash, IdentityKey, TopicHash};
pub use ids::PeerId;
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}
