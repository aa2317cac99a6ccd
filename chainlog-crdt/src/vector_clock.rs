//! Vector clocks for causal ordering of CRDT operations.
//!
//! Each actor owns one counter. Comparing two clocks tells whether one
//! operation causally precedes another or whether they are concurrent.
//! Counters live in a `BTreeMap` so a clock always serializes identically.

use chainlog_types::PeerId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Causality relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Neither clock dominates the other.
    Concurrent,
    /// Clocks are identical.
    Equal,
}

/// A mapping from actor to counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    /// Creates a new empty vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a clock from explicit `(actor, counter)` pairs. Zero counters
    /// are dropped so equal clocks always compare and serialize equal.
    #[must_use]
    pub fn from_counters(pairs: impl IntoIterator<Item = (PeerId, u64)>) -> Self {
        Self {
            counters: pairs.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    /// Returns the counter for an actor (0 if absent).
    #[must_use]
    pub fn get(&self, actor: &PeerId) -> u64 {
        self.counters.get(actor).copied().unwrap_or(0)
    }

    /// Iterates actors and counters in actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.counters.iter()
    }

    /// Number of actors with a non-zero counter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if no actor has ticked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Sum of all counters.
    ///
    /// Strictly grows along causal chains: if `a` happened before `b`, then
    /// `a.weight() < b.weight()`.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.counters.values().fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    /// Sum of all counters, or `None` if it does not fit in a `u64`.
    #[must_use]
    pub fn checked_weight(&self) -> Option<u64> {
        self.counters
            .values()
            .try_fold(0u64, |acc, c| acc.checked_add(*c))
    }

    /// Advances `actor`'s counter and returns the new value. Saturates at
    /// `u64::MAX`.
    pub fn increment(&mut self, actor: PeerId) -> u64 {
        let counter = self.counters.entry(actor).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Raises `actor`'s counter to `value` if it is currently lower.
    pub fn update(&mut self, actor: PeerId, value: u64) {
        if value == 0 {
            return;
        }
        let counter = self.counters.entry(actor).or_insert(0);
        *counter = (*counter).max(value);
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &Self) {
        for (actor, &value) in &other.counters {
            self.update(*actor, value);
        }
    }

    /// Returns the pointwise maximum of both clocks.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Compares two clocks by causal order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for actor in self.counters.keys().chain(other.counters.keys()) {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Greater => self_ahead = true,
                Ordering::Less => other_ahead = true,
                Ordering::Equal => {}
            }
            if self_ahead && other_ahead {
                return CausalOrder::Concurrent;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Returns true if this clock happened strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// Returns true if neither clock dominates the other.
    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Returns true if this clock is greater than or equal to `other` for
    /// every actor.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}
