//! A JSON-like document folded from CRDT operations.
//!
//! Every field is an LWW register over `Option<Value>`; `None` is a
//! tombstone left by a delete.

use chainlog_types::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::{CrdtOperation, CrdtResult, LWWRegister, OpId, OperationPayload, VectorClock};

/// Convergent document state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtDocument {
    fields: BTreeMap<String, LWWRegister<Option<Value>>>,
    clock: VectorClock,
    applied: BTreeSet<OpId>,
}

impl CrdtDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the next operation `actor` would emit against this state.
    ///
    /// The operation is not applied; callers persist it first and then feed
    /// it back through [`CrdtDocument::apply`].
    #[must_use]
    pub fn prepare(&self, actor: PeerId, payload: OperationPayload) -> CrdtOperation {
        CrdtOperation::new(actor, &self.clock, payload)
    }

    /// Folds one operation into the state.
    ///
    /// Returns false if the operation was already applied.
    pub fn apply(&mut self, op: &CrdtOperation) -> bool {
        if !self.applied.insert(op.op_id) {
            return false;
        }
        self.clock.merge(&op.vector_clock);

        let stamp = op.stamp();
        let (field, value) = match &op.payload {
            OperationPayload::Set { field, value } => (field, Some(value.clone())),
            OperationPayload::Delete { field } => (field, None),
        };
        match self.fields.get_mut(field) {
            Some(register) => {
                register.set(value, stamp);
            }
            None => {
                self.fields
                    .insert(field.clone(), LWWRegister::new(value, stamp));
            }
        }
        true
    }

    /// Decodes an entry payload and folds it in.
    pub fn apply_encoded(&mut self, bytes: &[u8]) -> CrdtResult<bool> {
        let op = CrdtOperation::decode(bytes)?;
        Ok(self.apply(&op))
    }

    /// Returns the live value of `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(|r| r.value().as_ref())
    }

    /// Returns true if `field` holds a live value.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Live fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter_map(|(k, r)| r.value().as_ref().map(|v| (k.as_str(), v)))
    }

    /// Number of live fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no field holds a live value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The merged clock of every applied operation.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Number of distinct operations applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Returns true if the operation has been applied.
    #[must_use]
    pub fn has_applied(&self, op_id: &OpId) -> bool {
        self.applied.contains(op_id)
    }

    /// The live fields as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    /// Canonical encoding of the full state, tombstones included.
    ///
    /// Two documents that applied the same operations encode identically.
    pub fn to_bytes(&self) -> CrdtResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
