//! CRDT operations as they are stored in log entries.

use chainlog_types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{CrdtError, CrdtResult, VectorClock, WriteStamp};

/// Globally unique operation identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(Uuid);

impl OpId {
    /// Creates a fresh operation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an operation does to the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Writes `value` into `field`.
    Set {
        field: String,
        value: serde_json::Value,
    },
    /// Removes `field`. Recorded as a tombstone so a concurrent older set
    /// cannot resurrect it.
    Delete { field: String },
}

impl OperationPayload {
    /// The field this payload targets.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Set { field, .. } | Self::Delete { field } => field,
        }
    }
}

/// One CRDT edit, carried verbatim as a log entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtOperation {
    pub op_id: OpId,
    pub actor: PeerId,
    /// The actor's view of history at the moment of the edit, including the
    /// edit itself.
    pub vector_clock: VectorClock,
    pub payload: OperationPayload,
}

impl CrdtOperation {
    /// Builds an operation whose clock is `clock` advanced by `actor`.
    #[must_use]
    pub fn new(actor: PeerId, clock: &VectorClock, payload: OperationPayload) -> Self {
        let mut vector_clock = clock.clone();
        vector_clock.increment(actor);
        Self {
            op_id: OpId::new(),
            actor,
            vector_clock,
            payload,
        }
    }

    /// Returns the key this operation competes with for its field.
    #[must_use]
    pub fn stamp(&self) -> WriteStamp {
        WriteStamp {
            weight: self.vector_clock.weight(),
            actor: self.actor,
            op_id: self.op_id,
        }
    }

    /// Encodes the operation as an entry payload.
    pub fn encode(&self) -> CrdtResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes and validates an entry payload.
    pub fn decode(bytes: &[u8]) -> CrdtResult<Self> {
        let op: Self = serde_json::from_slice(bytes)?;
        op.validate()?;
        Ok(op)
    }

    /// Checks that the operation advanced its own actor's counter and that
    /// its clock leaves room for another tick.
    pub fn validate(&self) -> CrdtResult<()> {
        if self.vector_clock.get(&self.actor) == 0 {
            return Err(CrdtError::MissingActorClock {
                op_id: self.op_id,
                actor: self.actor,
            });
        }
        match self.vector_clock.checked_weight() {
            Some(weight) if weight < u64::MAX => Ok(()),
            _ => Err(CrdtError::ClockExhausted { op_id: self.op_id }),
        }
    }
}
