//! Convergent documents carried by logs.
//!
//! A [`CrdtBridge`] owns one writable log. Local edits become entries in
//! that log; entries replicated from other peers' logs are folded in as
//! they arrive. Only operations travel; every peer derives its document by
//! folding the operations it holds, so peers holding the same operations
//! hold byte-identical documents.

use chainlog_crdt::{CrdtDocument, CrdtOperation, OperationPayload};
use chainlog_store::{Entry, LogStore};
use chainlog_types::PeerId;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::replication::ReplicationObserver;

/// Folds a local log and any number of replicated logs into one document.
pub struct CrdtBridge {
    actor: PeerId,
    log: Arc<LogStore>,
    document: Mutex<CrdtDocument>,
    watched: RwLock<BTreeSet<String>>,
}

impl CrdtBridge {
    /// Opens a bridge writing as `actor` into `log`, replaying whatever the
    /// log already holds.
    pub fn open(actor: PeerId, log: Arc<LogStore>) -> SyncResult<Self> {
        let mut document = CrdtDocument::new();
        fold_log(&mut document, &log)?;
        let watched = BTreeSet::from([log.name().to_string()]);
        debug!(log = log.name(), ops = document.applied_count(), "bridge opened");
        Ok(Self {
            actor,
            log,
            document: Mutex::new(document),
            watched: RwLock::new(watched),
        })
    }

    #[must_use]
    pub fn actor(&self) -> PeerId {
        self.actor
    }

    /// The log local edits are written to.
    #[must_use]
    pub fn log(&self) -> &Arc<LogStore> {
        &self.log
    }

    /// Appends `operation` to the local log, then applies it.
    ///
    /// Returns the entry's sequence index. Nothing is applied if the
    /// append fails.
    pub fn submit(&self, operation: &CrdtOperation) -> SyncResult<u64> {
        operation.validate()?;
        let bytes = operation.encode()?;
        let mut document = self.document();
        let index = self.log.append(bytes)?;
        document.apply(operation);
        debug!(log = self.log.name(), index, op = %operation.op_id, "operation submitted");
        Ok(index)
    }

    /// Sets `field` to `value`, stamped after everything seen so far.
    pub fn set(&self, field: impl Into<String>, value: Value) -> SyncResult<CrdtOperation> {
        self.edit(OperationPayload::Set {
            field: field.into(),
            value,
        })
    }

    /// Deletes `field`, stamped after everything seen so far.
    pub fn delete(&self, field: impl Into<String>) -> SyncResult<CrdtOperation> {
        self.edit(OperationPayload::Delete {
            field: field.into(),
        })
    }

    fn edit(&self, payload: OperationPayload) -> SyncResult<CrdtOperation> {
        let mut document = self.document();
        let operation = document.prepare(self.actor, payload);
        operation.validate()?;
        self.log.append(operation.encode()?)?;
        document.apply(&operation);
        Ok(operation)
    }

    /// Folds one replicated entry into the document. Returns false if the
    /// operation was already known.
    pub fn on_replicated(&self, entry: &Entry) -> SyncResult<bool> {
        let applied = self.document().apply_encoded(&entry.payload)?;
        Ok(applied)
    }

    /// Folds everything `replica` holds and keeps folding what replication
    /// appends to it. Returns the number of new operations.
    pub fn attach(&self, replica: &Arc<LogStore>) -> SyncResult<usize> {
        self.watch(replica.name());
        let mut document = self.document();
        let before = document.applied_count();
        fold_log(&mut document, replica)?;
        Ok(document.applied_count() - before)
    }

    /// Folds entries replicated into the log `name` from now on, whether or
    /// not the replica exists yet.
    pub fn watch(&self, name: &str) {
        self.watched
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Returns true if entries replicated into `name` are folded.
    #[must_use]
    pub fn is_watching(&self, name: &str) -> bool {
        self.watched
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// The current folded state.
    #[must_use]
    pub fn snapshot(&self) -> CrdtDocument {
        self.document().clone()
    }

    /// Reads one field of the current state.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.document().get(field).cloned()
    }

    fn document(&self) -> MutexGuard<'_, CrdtDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReplicationObserver for CrdtBridge {
    fn on_replicated(&self, log_name: &str, entry: &Entry) {
        if !self.is_watching(log_name) {
            return;
        }
        if let Err(e) = CrdtBridge::on_replicated(self, entry) {
            warn!(log = log_name, index = entry.index, error = %e, "skipping undecodable entry");
        }
    }
}

fn fold_log(document: &mut CrdtDocument, log: &LogStore) -> SyncResult<()> {
    for entry in log.range(0, log.length())? {
        document.apply_encoded(&entry.payload)?;
    }
    Ok(())
}
