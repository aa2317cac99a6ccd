//! TTL-bounded topic → address records.

use chainlog_types::TopicHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A weak, time-bounded claim that `peer_address` serves `topic_hash`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub topic_hash: TopicHash,
    pub peer_address: String,
    /// Milliseconds since the Unix epoch.
    pub announced_at: u64,
    pub ttl_ms: u64,
}

impl DiscoveryRecord {
    /// When the record stops being valid.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.announced_at.saturating_add(self.ttl_ms)
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at()
    }
}

/// Records keyed by topic, then by address.
///
/// Time is passed in explicitly so callers decide which clock applies.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<TopicHash, BTreeMap<String, DiscoveryRecord>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a record.
    pub fn upsert(&mut self, record: DiscoveryRecord) {
        self.topics
            .entry(record.topic_hash)
            .or_default()
            .insert(record.peer_address.clone(), record);
    }

    /// Drops everything held for `topic` and stores `records` instead.
    pub fn replace(&mut self, topic: TopicHash, records: impl IntoIterator<Item = DiscoveryRecord>) {
        let fresh: BTreeMap<_, _> = records
            .into_iter()
            .filter(|r| r.topic_hash == topic)
            .map(|r| (r.peer_address.clone(), r))
            .collect();
        if fresh.is_empty() {
            self.topics.remove(&topic);
        } else {
            self.topics.insert(topic, fresh);
        }
    }

    /// Removes one address from a topic. Returns true if it was present.
    pub fn remove(&mut self, topic: &TopicHash, address: &str) -> bool {
        let Some(records) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = records.remove(address).is_some();
        if records.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Non-expired records for `topic`, ordered by address.
    #[must_use]
    pub fn lookup(&self, topic: &TopicHash, now_ms: u64) -> Vec<DiscoveryRecord> {
        self.topics
            .get(topic)
            .map(|records| {
                records
                    .values()
                    .filter(|r| !r.is_expired(now_ms))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops expired records and returns how many were removed.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let mut purged = 0;
        self.topics.retain(|_, records| {
            let before = records.len();
            records.retain(|_, r| !r.is_expired(now_ms));
            purged += before - records.len();
            !records.is_empty()
        });
        purged
    }

    /// Number of topics with at least one record.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total records held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
