//! Per-peer replication progress.

use chainlog_types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a peer relationship stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// No session running; the last one (if any) succeeded.
    Idle,
    /// A session is in progress.
    Syncing,
    /// The last session hit corruption or a protocol violation.
    Stalled,
    /// The last session ran out of retries on network failures.
    Disconnected,
}

/// Progress for one log shared with one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    /// The peer's length as last reported.
    pub remote_length: u64,
    /// How far the local copy agrees with the peer's, verified.
    pub verified_up_to: u64,
}

impl LogCursor {
    /// Returns true once everything the peer reported is held locally.
    #[must_use]
    pub fn is_caught_up(&self) -> bool {
        self.verified_up_to >= self.remote_length
    }
}

/// The relationship record for one remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPeer {
    pub peer_id: PeerId,
    pub address: String,
    pub sync_state: SyncState,
    /// Cursors keyed by log name.
    pub logs: BTreeMap<String, LogCursor>,
}

impl ReplicationPeer {
    /// Creates an idle record with no log progress.
    pub fn new(peer_id: PeerId, address: impl Into<String>) -> Self {
        Self {
            peer_id,
            address: address.into(),
            sync_state: SyncState::Idle,
            logs: BTreeMap::new(),
        }
    }

    /// Returns the cursor for `log_name` (zeroed if never synced).
    #[must_use]
    pub fn cursor(&self, log_name: &str) -> LogCursor {
        self.logs.get(log_name).copied().unwrap_or_default()
    }

    /// The peer's last reported length for `log_name`.
    #[must_use]
    pub fn remote_length(&self, log_name: &str) -> u64 {
        self.cursor(log_name).remote_length
    }

    /// The verified checkpoint for `log_name`.
    #[must_use]
    pub fn verified_up_to(&self, log_name: &str) -> u64 {
        self.cursor(log_name).verified_up_to
    }

    pub(crate) fn cursor_mut(&mut self, log_name: &str) -> &mut LogCursor {
        self.logs.entry(log_name.to_string()).or_default()
    }
}
