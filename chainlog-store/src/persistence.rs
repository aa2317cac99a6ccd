//! The durable side of a corestore.
//!
//! A [`LogStore`](crate::LogStore) writes every entry through an
//! [`EntryPersistence`] before making it visible, and a corestore rebuilds
//! its logs from it on open.

use chainlog_types::IdentityKey;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{ProvenEntry, StorageError, StorageResult};

/// What a corestore needs to remember about one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDescriptor {
    pub name: String,
    pub identity: IdentityKey,
    /// True if this corestore holds the log's signing key.
    pub writable: bool,
}

/// Durable storage for seeds, log descriptors and entries.
pub trait EntryPersistence: Send + Sync {
    /// Returns the corestore master seed, if one was stored.
    fn load_seed(&self) -> StorageResult<Option<[u8; 32]>>;

    /// Stores the corestore master seed.
    fn store_seed(&self, seed: &[u8; 32]) -> StorageResult<()>;

    /// Lists every registered log.
    fn list_logs(&self) -> StorageResult<Vec<LogDescriptor>>;

    /// Registers a log. Registering an existing name is a no-op.
    fn register_log(&self, descriptor: &LogDescriptor) -> StorageResult<()>;

    /// Returns the descriptor registered under `name`, if any.
    fn find_log(&self, name: &str) -> StorageResult<Option<LogDescriptor>> {
        Ok(self.list_logs()?.into_iter().find(|d| d.name == name))
    }

    /// Loads all entries of a log in index order.
    fn load_entries(&self, name: &str) -> StorageResult<Vec<ProvenEntry>>;

    /// Durably appends entries. Either all of them are stored or none.
    ///
    /// Fails if the first entry does not continue the stored sequence.
    fn append_entries(&self, name: &str, entries: &[ProvenEntry]) -> StorageResult<()>;
}

#[derive(Default)]
struct MemoryState {
    seed: Option<[u8; 32]>,
    logs: BTreeMap<String, (LogDescriptor, Vec<ProvenEntry>)>,
}

/// Keeps everything in process memory.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
}

impl MemoryPersistence {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntryPersistence for MemoryPersistence {
    fn load_seed(&self) -> StorageResult<Option<[u8; 32]>> {
        Ok(self.state().seed)
    }

    fn store_seed(&self, seed: &[u8; 32]) -> StorageResult<()> {
        self.state().seed = Some(*seed);
        Ok(())
    }

    fn list_logs(&self) -> StorageResult<Vec<LogDescriptor>> {
        Ok(self.state().logs.values().map(|(d, _)| d.clone()).collect())
    }

    fn register_log(&self, descriptor: &LogDescriptor) -> StorageResult<()> {
        self.state()
            .logs
            .entry(descriptor.name.clone())
            .or_insert_with(|| (descriptor.clone(), Vec::new()));
        Ok(())
    }

    fn find_log(&self, name: &str) -> StorageResult<Option<LogDescriptor>> {
        Ok(self.state().logs.get(name).map(|(d, _)| d.clone()))
    }

    fn load_entries(&self, name: &str) -> StorageResult<Vec<ProvenEntry>> {
        Ok(self
            .state()
            .logs
            .get(name)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default())
    }

    fn append_entries(&self, name: &str, entries: &[ProvenEntry]) -> StorageResult<()> {
        let mut state = self.state();
        let (_, stored) = state
            .logs
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownLog(name.to_string()))?;
        if let Some(first) = entries.first() {
            let expected = stored.len() as u64;
            if first.entry.index != expected {
                return Err(StorageError::InvalidData(format!(
                    "log {name} expects index {expected} next, got {}",
                    first.entry.index
                )));
            }
        }
        stored.extend_from_slice(entries);
        Ok(())
    }
}
