//! A namespace of independent logs.

use chainlog_types::IdentityKey;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::identity::{LogSigner, random_seed};
use crate::persistence::{EntryPersistence, LogDescriptor, MemoryPersistence};
use crate::{LogStore, StorageError, StorageResult};

/// Configuration for a [`Corestore`].
#[derive(Debug, Clone, Default)]
pub struct CorestoreConfig {
    /// Upper bound on entries per log; `None` means unbounded.
    pub max_log_length: Option<u64>,
}

/// Owns many named logs and the seed their writer keys derive from.
///
/// Handles returned by [`Corestore::get`] are shared; closing the corestore
/// closes every log it still owns, after which old handles fail with
/// [`StorageError::Closed`]. A [`detach`](Corestore::detach)ed log is no
/// longer owned and survives `close`.
pub struct Corestore {
    seed: [u8; 32],
    config: CorestoreConfig,
    persistence: Arc<dyn EntryPersistence>,
    logs: RwLock<BTreeMap<String, Arc<LogStore>>>,
    closed: AtomicBool,
}

impl Corestore {
    /// Creates an in-memory corestore with a fresh seed.
    #[must_use]
    pub fn new(config: CorestoreConfig) -> Self {
        Self {
            seed: random_seed(),
            config,
            persistence: Arc::new(MemoryPersistence::new()),
            logs: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens a corestore over `persistence`, reloading and verifying every
    /// log it holds.
    pub fn open(
        persistence: Arc<dyn EntryPersistence>,
        config: CorestoreConfig,
    ) -> StorageResult<Self> {
        let seed = match persistence.load_seed()? {
            Some(seed) => seed,
            None => {
                let seed = random_seed();
                persistence.store_seed(&seed)?;
                seed
            }
        };

        let mut logs = BTreeMap::new();
        for descriptor in persistence.list_logs()? {
            let signer = if descriptor.writable {
                let signer = LogSigner::derive(&seed, &descriptor.name);
                if signer.identity() != descriptor.identity {
                    return Err(StorageError::InvalidData(format!(
                        "log {} was written under a different seed",
                        descriptor.name
                    )));
                }
                Some(signer)
            } else {
                None
            };
            let records = persistence.load_entries(&descriptor.name)?;
            let log = LogStore::open(
                descriptor.name.clone(),
                descriptor.identity,
                signer,
                config.max_log_length,
                Arc::clone(&persistence),
                records,
            )?;
            debug!(log = %descriptor.name, length = log.length(), "reopened log");
            logs.insert(descriptor.name, Arc::new(log));
        }
        info!(logs = logs.len(), "opened corestore");

        Ok(Self {
            seed,
            config,
            persistence,
            logs: RwLock::new(logs),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the log called `name`, creating an empty writable log on
    /// first use. A name already held as a replica returns the replica.
    pub fn get(&self, name: &str) -> StorageResult<Arc<LogStore>> {
        self.ensure_open()?;
        if let Some(log) = self.find(name) {
            return Ok(log);
        }
        let signer = LogSigner::derive(&self.seed, name);
        let identity = signer.identity();
        self.create(name, identity, Some(signer))
    }

    /// Returns the replica of a remote writer's log, creating it empty on
    /// first use.
    pub fn get_replica(&self, name: &str, identity: IdentityKey) -> StorageResult<Arc<LogStore>> {
        self.ensure_open()?;
        if let Some(log) = self.find(name) {
            return Self::check_identity(log, identity);
        }
        self.create(name, identity, None)
    }

    /// Returns an existing log without creating one.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<LogStore>> {
        if self.is_closed() {
            return None;
        }
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of every owned log.
    #[must_use]
    pub fn list(&self) -> BTreeSet<String> {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The identity a writable log called `name` has (or would have) here.
    #[must_use]
    pub fn writer_identity(&self, name: &str) -> IdentityKey {
        LogSigner::derive(&self.seed, name).identity()
    }

    /// Releases ownership of a log. The returned handle stays usable after
    /// the corestore closes.
    pub fn detach(&self, name: &str) -> StorageResult<Arc<LogStore>> {
        self.ensure_open()?;
        self.logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| StorageError::UnknownLog(name.to_string()))
    }

    /// Closes every owned log.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let logs = std::mem::take(&mut *self.logs.write().unwrap_or_else(PoisonError::into_inner));
        for log in logs.values() {
            log.close();
        }
        info!(logs = logs.len(), "closed corestore");
    }

    /// Returns true once [`close`](Corestore::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_identity(log: Arc<LogStore>, identity: IdentityKey) -> StorageResult<Arc<LogStore>> {
        if log.identity() == identity {
            Ok(log)
        } else {
            Err(StorageError::IdentityMismatch {
                name: log.name().to_string(),
                existing: log.identity(),
                requested: identity,
            })
        }
    }

    fn create(
        &self,
        name: &str,
        identity: IdentityKey,
        signer: Option<LogSigner>,
    ) -> StorageResult<Arc<LogStore>> {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between our lookup and the lock.
        if let Some(existing) = logs.get(name) {
            return Self::check_identity(Arc::clone(existing), identity);
        }

        // A detached log keeps its persisted record; pick it back up.
        let records = match self.persistence.find_log(name)? {
            Some(registered) if registered.identity != identity => {
                return Err(StorageError::IdentityMismatch {
                    name: name.to_string(),
                    existing: registered.identity,
                    requested: identity,
                });
            }
            Some(_) => self.persistence.load_entries(name)?,
            None => {
                self.persistence.register_log(&LogDescriptor {
                    name: name.to_string(),
                    identity,
                    writable: signer.is_some(),
                })?;
                Vec::new()
            }
        };
        let log = Arc::new(LogStore::open(
            name.to_string(),
            identity,
            signer,
            self.config.max_log_length,
            Arc::clone(&self.persistence),
            records,
        )?);
        logs.insert(name.to_string(), Arc::clone(&log));
        debug!(log = name, writable = log.is_writable(), length = log.length(), "created log");
        Ok(log)
    }
}

impl std::fmt::Debug for Corestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corestore")
            .field("logs", &self.list())
            .field("closed", &self.is_closed())
            .finish()
    }
}
