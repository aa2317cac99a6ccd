//! Replication, discovery and CRDT bridging for chainlog.
//!
//! # Components
//!
//! - **Discovery**: [`DiscoveryManager`] announces this peer under topics
//!   and looks up others through a [`Rendezvous`] backend, falling back to
//!   its cache when the backend is unreachable.
//! - **Replication**: [`ReplicationManager`] pulls missing entries of a
//!   named log from a peer, verifying the hash chain and the writer's
//!   proofs before anything is appended.
//! - **Channels**: [`Channel`] carries the exchange either in-process or
//!   over libp2p request-response ([`p2p`]).
//! - **CRDT bridge**: [`CrdtBridge`] writes document edits to a log and
//!   folds replicated edits back in.
//!
//! # Session
//!
//! 1. `Hello` / `HelloAck`: lengths and the log's writer identity
//! 2. `Want` / `Entries`: one verified batch at a time
//! 3. `Ack` / `Ack`: both sides record the verified length
//!
//! # Example
//!
//! ```
//! use chainlog_store::{Corestore, CorestoreConfig};
//! use chainlog_sync::{ReplicationConfig, ReplicationManager};
//! use chainlog_types::PeerId;
//! use std::sync::Arc;
//!
//! let corestore = Arc::new(Corestore::new(CorestoreConfig::default()));
//! let manager = ReplicationManager::new(PeerId::new(), corestore, ReplicationConfig::default());
//! assert!(manager.peers().is_empty());
//! ```

mod bridge;
pub mod discovery;
mod error;
pub mod metrics;
pub mod p2p;
pub mod protocol;
mod replication;
mod retry;
pub mod state;
pub mod transport;

pub use bridge::CrdtBridge;
pub use discovery::{
    Clock, DiscoveryConfig, DiscoveryManager, DiscoveryRecord, HttpRendezvous, ManualClock,
    MemoryRendezvous, Rendezvous, SystemClock, TopicRegistry, TopicState,
};
pub use error::{SyncError, SyncResult};
pub use metrics::{MetricsSnapshot, SyncMetrics, init_metrics};
pub use protocol::{
    AckMessage, AnnounceRequest, EntriesMessage, ErrorMessage, HelloAckMessage, HelloMessage,
    LookupResponse, MAX_BATCH_SIZE, PROTOCOL_VERSION, ReplicationMessage, WantMessage,
};
pub use replication::{
    ReplicationConfig, ReplicationManager, ReplicationObserver, ResponderSession, SyncReport,
};
pub use retry::RetryPolicy;
pub use state::{LogCursor, ReplicationPeer, SyncState};
pub use transport::{Channel, LocalChannel, ReplicationChannel};
