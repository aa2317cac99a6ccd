//! Append-only, hash-chained log storage for chainlog.
//!
//! # Architecture
//!
//! - [`Entry`] records are linked by SHA-256 into a chain; tampering with any
//!   entry breaks every later link
//! - each log has one ed25519 writer whose signature ([`ChainProof`])
//!   accompanies every entry, so replicas can check pulled data without
//!   trusting the peer that served it
//! - a [`Corestore`] owns many named [`LogStore`]s and persists them through
//!   an [`EntryPersistence`] backend ([`MemoryPersistence`] or
//!   [`SqlitePersistence`])

mod corestore;
mod entry;
mod error;
mod identity;
mod log;
mod persistence;
mod sqlite;
mod stream;

pub use corestore::{Corestore, CorestoreConfig};
pub use entry::{Entry, ProvenEntry, verify_entries};
pub use error::{StorageError, StorageResult};
pub use identity::{ChainProof, LogSigner};
pub use log::LogStore;
pub use persistence::{EntryPersistence, LogDescriptor, MemoryPersistence};
pub use sqlite::SqlitePersistence;
pub use stream::ReadStream;
