//! CRDT primitives for chainlog.
//!
//! - [`VectorClock`] - per-actor counters for causal ordering
//! - [`LWWRegister<T>`] - last-writer-wins register keyed by a [`WriteStamp`]
//! - [`CrdtOperation`] - one edit, stored verbatim as a log entry payload
//! - [`CrdtDocument`] - the state obtained by folding every known operation
//!
//! Folding is commutative, associative and idempotent: two replicas holding
//! the same set of operations produce byte-identical documents no matter the
//! order or multiplicity in which the operations arrived.

mod document;
mod lww_register;
mod operation;
mod vector_clock;

pub use document::CrdtDocument;
pub use lww_register::{LWWRegister, WriteStamp};
pub use operation::{CrdtOperation, OpId, OperationPayload};
pub use vector_clock::{CausalOrder, VectorClock};

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors that can occur when decoding or applying operations.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    /// The bytes are not a valid encoded operation.
    #[error("invalid operation encoding: {0}")]
    Decode(#[from] serde_json::Error),

    /// The operation does not advance its own actor's counter.
    #[error("operation {op_id} has no clock entry for its actor {actor}")]
    MissingActorClock { op_id: OpId, actor: chainlog_types::PeerId },

    /// The operation's clock counters sum to `u64::MAX` or more.
    #[error("operation {op_id} has an exhausted vector clock")]
    ClockExhausted { op_id: OpId },
}
