//! Hybrid logical clock timestamps for log entries.
//!
//! A log stamps each entry with the wall clock, but wall clocks can stall or
//! step backwards. The logical counter keeps the stamps of one log strictly
//! increasing regardless.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp.
///
/// Ordered by `wall_time` first, then by `logical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Milliseconds since the Unix epoch.
    wall_time: u64,
    /// Tie-breaking counter for stamps within the same millisecond.
    logical: u32,
}

impl HybridTimestamp {
    /// Reads the current wall clock.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: wall_clock_millis(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Returns a stamp strictly greater than `self`, using the wall clock when
    /// it has moved past `self` and bumping the logical counter otherwise.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_clock_millis();
        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else if self.logical == u32::MAX {
            Self {
                wall_time: self.wall_time + 1,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical + 1,
            }
        }
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_time
            .cmp(&other.wall_time)
            .then(self.logical.cmp(&other.logical))
    }
}

/// Milliseconds since the Unix epoch; a clock set before 1970 reads as 0.
fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
