//! Replication and discovery wire messages.
//!
//! Replication is a pull exchange driven by the requester; every message
//! it sends is answered by exactly one message:
//! 1. `Hello` → `HelloAck` (lengths and the log's identity)
//! 2. `Want` → `Entries` (one batch, with chain proofs)
//! 3. `Ack` → `Ack` (both sides learn each other's verified length)
//!
//! Either side may answer with `Error`, which ends the session without
//! touching local state.

use chainlog_store::ProvenEntry;
use chainlog_types::{IdentityKey, PeerId};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum number of entries to send in a single batch.
pub const MAX_BATCH_SIZE: u64 = 100;

/// A replication protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMessage {
    /// Opens a session for one log.
    Hello(HelloMessage),

    /// Response to a Hello message.
    HelloAck(HelloAckMessage),

    /// Asks for the entries in `[from, to)`.
    Want(WantMessage),

    /// A batch of entries.
    Entries(EntriesMessage),

    /// Reports the sender's verified length.
    Ack(AckMessage),

    /// Error message.
    Error(ErrorMessage),
}

/// Initial handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Protocol version.
    pub version: u32,
    /// Sender's peer ID.
    pub peer_id: PeerId,
    /// The log to replicate.
    pub log_name: String,
    /// The sender's idea of the log's writer, if it holds the log.
    #[serde(default)]
    pub identity_key: Option<IdentityKey>,
    /// The sender's current length.
    pub length: u64,
}

impl HelloMessage {
    /// Creates a Hello for a log the sender does not hold yet.
    pub fn new(peer_id: PeerId, log_name: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_id,
            log_name: log_name.into(),
            identity_key: None,
            length: 0,
        }
    }

    /// Fills in what the sender already holds.
    #[must_use]
    pub fn with_log(mut self, identity_key: IdentityKey, length: u64) -> Self {
        self.identity_key = Some(identity_key);
        self.length = length;
        self
    }
}

/// Response to Hello message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAckMessage {
    /// Protocol version.
    pub version: u32,
    /// The log's writer.
    pub identity_key: IdentityKey,
    /// The responder's current length.
    pub length: u64,
}

/// Request for a range of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantMessage {
    pub log_name: String,
    pub from: u64,
    pub to: u64,
}

/// A batch of entries starting at `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntriesMessage {
    pub log_name: String,
    pub from: u64,
    pub entries: Vec<ProvenEntry>,
}

impl EntriesMessage {
    /// Total payload bytes carried.
    #[must_use]
    pub fn payload_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.entry.payload.len() as u64)
            .sum()
    }
}

/// Acknowledgment of verified entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub log_name: String,
    pub verified_up_to: u64,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: u32,
    /// Human-readable reason.
    pub reason: String,
}

impl ErrorMessage {
    pub const VERSION_MISMATCH: u32 = 1;
    pub const UNKNOWN_LOG: u32 = 2;
    pub const IDENTITY_MISMATCH: u32 = 3;
    pub const OUT_OF_RANGE: u32 = 4;
    pub const CORRUPTION: u32 = 5;
    pub const UNEXPECTED: u32 = 6;
    pub const INTERNAL: u32 = 99;

    /// Creates a new error message.
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Version mismatch error.
    pub fn version_mismatch(expected: u32, got: u32) -> Self {
        Self::new(
            Self::VERSION_MISMATCH,
            format!("protocol version mismatch: expected {expected}, got {got}"),
        )
    }

    /// Unknown log error.
    pub fn unknown_log(name: &str) -> Self {
        Self::new(Self::UNKNOWN_LOG, format!("unknown log: {name}"))
    }

    /// Internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, reason)
    }
}

impl From<ErrorMessage> for ReplicationMessage {
    fn from(e: ErrorMessage) -> Self {
        Self::Error(e)
    }
}

/// Body of a rendezvous announce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub address: String,
    pub ttl_ms: u64,
}

/// Body of a rendezvous lookup response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub records: Vec<crate::discovery::DiscoveryRecord>,
}
