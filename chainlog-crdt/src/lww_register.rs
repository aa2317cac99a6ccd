//! Last-Writer-Wins Register (LWW-Register).
//!
//! A CRDT that stores a single value. Concurrent writes are resolved by
//! comparing [`WriteStamp`]s: the write with the greatest stamp wins.

use chainlog_types::PeerId;
use serde::{Deserialize, Serialize};

use crate::OpId;

/// The ordering key of a write.
///
/// Compared field by field: clock weight first, then the writing actor, then
/// the operation id. Clock weight strictly grows along causal chains, so a
/// write that causally follows another always wins, and concurrent writes
/// fall back to a fixed order every replica agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriteStamp {
    /// Sum of the writing operation's vector clock.
    pub weight: u64,
    /// The actor that wrote.
    pub actor: PeerId,
    /// The operation that wrote.
    pub op_id: OpId,
}

/// A Last-Writer-Wins Register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWRegister<T> {
    value: T,
    stamp: WriteStamp,
}

impl<T> LWWRegister<T> {
    /// Creates a register holding `value` as written at `stamp`.
    #[must_use]
    pub fn new(value: T, stamp: WriteStamp) -> Self {
        Self { value, stamp }
    }

    /// Returns a reference to the current value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the stamp of the winning write.
    #[must_use]
    pub fn stamp(&self) -> WriteStamp {
        self.stamp
    }

    /// Offers a write. Returns true if it won and replaced the value.
    pub fn set(&mut self, value: T, stamp: WriteStamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    /// Consumes the register, returning its value.
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: Clone> LWWRegister<T> {
    /// Merges another register into this one; the greater stamp wins.
    ///
    /// Commutative, associative and idempotent.
    pub fn merge(&mut self, other: &Self) {
        if other.stamp > self.stamp {
            self.value = other.value.clone();
            self.stamp = other.stamp;
        }
    }

    /// Returns the merge of this register and `other`.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }
}
