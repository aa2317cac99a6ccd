//! A single append-only, hash-chained log.

use chainlog_types::{Hash, HybridTimestamp, IdentityKey};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::entry::first_invalid;
use crate::identity::LogSigner;
use crate::persistence::EntryPersistence;
use crate::stream::ReadStream;
use crate::{Entry, ProvenEntry, StorageError, StorageResult};

/// One named log with exactly one writer.
///
/// Readers never block each other. `length` is an atomic that only grows,
/// so it can be polled while an append is in flight; an entry becomes
/// visible only after it has been persisted.
pub struct LogStore {
    name: String,
    identity: IdentityKey,
    signer: Option<LogSigner>,
    max_length: Option<u64>,
    persistence: Arc<dyn EntryPersistence>,
    records: RwLock<Vec<ProvenEntry>>,
    length: AtomicU64,
    /// Serializes writers; holds the last issued timestamp.
    writer: Mutex<Option<HybridTimestamp>>,
    closed: AtomicBool,
}

impl LogStore {
    /// Rebuilds a log from persisted entries, verifying the chain.
    pub(crate) fn open(
        name: String,
        identity: IdentityKey,
        signer: Option<LogSigner>,
        max_length: Option<u64>,
        persistence: Arc<dyn EntryPersistence>,
        records: Vec<ProvenEntry>,
    ) -> StorageResult<Self> {
        for (position, record) in records.iter().enumerate() {
            if record.entry.index != position as u64 {
                return Err(StorageError::corruption(
                    position as u64,
                    "persisted entries have a gap",
                ));
            }
        }
        let entries: Vec<Entry> = records.iter().map(|r| r.entry.clone()).collect();
        if let Some((index, reason)) = first_invalid(&entries) {
            return Err(StorageError::corruption(index, reason));
        }
        if let Some(bad) = records
            .iter()
            .find(|r| !r.proof.verify(&identity, &r.entry.hash))
        {
            return Err(StorageError::corruption(
                bad.entry.index,
                "persisted proof does not verify",
            ));
        }

        let last_timestamp = records.last().map(|r| r.entry.timestamp);
        Ok(Self {
            name,
            identity,
            signer,
            max_length,
            persistence,
            length: AtomicU64::new(records.len() as u64),
            records: RwLock::new(records),
            writer: Mutex::new(last_timestamp),
            closed: AtomicBool::new(false),
        })
    }

    /// The log's name within its corestore.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The public key every entry's proof verifies under.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        self.identity
    }

    /// Returns true if this process can append locally.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.signer.is_some()
    }

    /// Returns true once the log or its corestore has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of committed entries.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    /// Returns true if no entry has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Hash of the last entry, or [`Hash::ZERO`] for an empty log.
    pub fn tail_hash(&self) -> StorageResult<Hash> {
        self.ensure_open()?;
        Ok(self
            .read()
            .last()
            .map(|r| r.entry.hash)
            .unwrap_or(Hash::ZERO))
    }

    /// Appends `payload` and returns its index.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> StorageResult<u64> {
        self.ensure_open()?;
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| StorageError::ReadOnly(self.name.clone()))?;

        let mut last_timestamp = self.lock_writer();
        let index = self.length();
        self.check_capacity(index, 1)?;

        let previous_hash = self.tail_hash()?;
        let timestamp = match *last_timestamp {
            Some(last) => last.tick(),
            None => HybridTimestamp::now(),
        };
        let entry = Entry::new(index, payload.into(), previous_hash, timestamp);
        let proof = signer.sign(&entry.hash);
        let record = ProvenEntry { entry, proof };

        self.persistence
            .append_entries(&self.name, std::slice::from_ref(&record))?;
        self.commit(vec![record]);
        *last_timestamp = Some(timestamp);

        debug!(log = %self.name, index, "appended entry");
        metrics::counter!("chainlog.log.entries_appended").increment(1);
        Ok(index)
    }

    /// Appends entries pulled from a peer, all or nothing.
    ///
    /// Entries below the current length must match what is already stored
    /// and are skipped. The rest must continue the chain from the local
    /// tail and carry proofs that verify under this log's identity.
    /// Returns the index range this call appended, which is empty when every
    /// entry was already held.
    pub fn append_verified(&self, batch: &[ProvenEntry]) -> StorageResult<Range<u64>> {
        self.ensure_open()?;
        let mut last_timestamp = self.lock_writer();
        let length = self.length();

        let mut fresh_from = batch.len();
        {
            let records = self.read();
            for (position, incoming) in batch.iter().enumerate() {
                let index = incoming.entry.index;
                if index >= length {
                    fresh_from = position;
                    break;
                }
                let held = &records[index as usize].entry;
                if held.hash != incoming.entry.hash {
                    return Err(self.reject(index, "conflicts with stored entry"));
                }
            }
        }
        let fresh = &batch[fresh_from..];
        let Some(first) = fresh.first() else {
            return Ok(length..length);
        };

        if first.entry.index != length {
            return Err(self.reject(first.entry.index, "does not start at local length"));
        }
        if first.entry.previous_hash != self.tail_hash()? {
            return Err(self.reject(first.entry.index, "does not link to local tail"));
        }
        let entries: Vec<Entry> = fresh.iter().map(|r| r.entry.clone()).collect();
        if let Some((index, reason)) = first_invalid(&entries) {
            return Err(self.reject(index, reason));
        }
        if let Some(bad) = fresh
            .iter()
            .find(|r| !r.proof.verify(&self.identity, &r.entry.hash))
        {
            return Err(self.reject(bad.entry.index, "proof does not verify"));
        }
        self.check_capacity(length, fresh.len() as u64)?;

        self.persistence.append_entries(&self.name, fresh)?;
        self.commit(fresh.to_vec());
        if let Some(last) = fresh.last() {
            *last_timestamp = Some(last.entry.timestamp);
        }

        let new_length = self.length();
        debug!(log = %self.name, from = length, to = new_length, "appended verified entries");
        metrics::counter!("chainlog.log.entries_appended").increment(fresh.len() as u64);
        Ok(length..new_length)
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: u64) -> StorageResult<Entry> {
        self.get_proven(index).map(|r| r.entry)
    }

    /// Returns the entry at `index` with its proof.
    pub fn get_proven(&self, index: u64) -> StorageResult<ProvenEntry> {
        self.ensure_open()?;
        let length = self.length();
        if index >= length {
            return Err(StorageError::OutOfRange { index, length });
        }
        Ok(self.read()[index as usize].clone())
    }

    /// Returns copies of entries in `[from, to)`.
    pub fn range(&self, from: u64, to: u64) -> StorageResult<Vec<Entry>> {
        Ok(self
            .proven_range(from, to)?
            .into_iter()
            .map(|r| r.entry)
            .collect())
    }

    /// Returns copies of entries in `[from, to)` with their proofs.
    pub fn proven_range(&self, from: u64, to: u64) -> StorageResult<Vec<ProvenEntry>> {
        self.ensure_open()?;
        let length = self.length();
        if to > length {
            return Err(StorageError::OutOfRange { index: to, length });
        }
        if from > to {
            return Err(StorageError::OutOfRange { index: from, length });
        }
        Ok(self.read()[from as usize..to as usize].to_vec())
    }

    /// Recomputes hashes over `[from, to)` and checks every link.
    ///
    /// Returns false for an inverted or out-of-range interval and for a
    /// closed log.
    #[must_use]
    pub fn verify_chain(&self, from: u64, to: u64) -> bool {
        if self.is_closed() || from > to || to > self.length() {
            return false;
        }
        let records = self.read();
        let mut expected_previous = match from {
            0 => Hash::ZERO,
            n => records[n as usize - 1].entry.hash,
        };
        for record in &records[from as usize..to as usize] {
            let entry = &record.entry;
            if entry.previous_hash != expected_previous || !entry.hash_is_valid() {
                warn!(log = %self.name, index = entry.index, "chain verification failed");
                return false;
            }
            expected_previous = entry.hash;
        }
        true
    }

    /// Returns a lazy reader over `[from, to)`; `None` follows the live
    /// length.
    #[must_use]
    pub fn read_stream(self: &Arc<Self>, from: u64, to: Option<u64>) -> ReadStream {
        ReadStream::new(Arc::clone(self), from, to)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_capacity(&self, length: u64, adding: u64) -> StorageResult<()> {
        match self.max_length {
            Some(max) if length + adding > max => Err(StorageError::CapacityExceeded { max }),
            _ => Ok(()),
        }
    }

    fn reject(&self, index: u64, reason: &str) -> StorageError {
        warn!(log = %self.name, index, reason, "rejected replicated batch");
        metrics::counter!("chainlog.log.verification_failures").increment(1);
        StorageError::corruption(index, reason)
    }

    fn commit(&self, records: Vec<ProvenEntry>) {
        let added = records.len() as u64;
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        guard.extend(records);
        self.length.fetch_add(added, Ordering::AcqRel);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ProvenEntry>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<HybridTimestamp>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("writable", &self.is_writable())
            .field("length", &self.length())
            .field("closed", &self.is_closed())
            .finish()
    }
}
