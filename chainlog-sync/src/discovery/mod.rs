//! Finding peers that share a topic.
//!
//! Each topic this manager touches moves through
//! `Unannounced → Announcing → Announced → Leaving → Unannounced`.
//! Lookups go to the rendezvous service; every successful answer is cached,
//! and when the service cannot be reached the cache answers instead until
//! its records expire.

mod clock;
mod registry;
mod rendezvous;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{DiscoveryRecord, TopicRegistry};
pub use rendezvous::{HttpRendezvous, MemoryRendezvous, Rendezvous};

use chainlog_types::TopicHash;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::metrics::SyncMetrics;
use crate::protocol::AnnounceRequest;
use crate::retry::RetryPolicy;

/// Lifecycle of this peer's announcement for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicState {
    Unannounced,
    Announcing,
    Announced,
    Leaving,
}

/// Configuration for a [`DiscoveryManager`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Lifetime requested for each announcement.
    pub ttl: Duration,
    /// Retries for rendezvous calls.
    pub retry: RetryPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

struct TrackedTopic {
    hash: TopicHash,
    state: TopicState,
}

/// Announces this peer under topics and looks up others.
pub struct DiscoveryManager {
    local_address: String,
    rendezvous: Arc<dyn Rendezvous>,
    clock: Arc<dyn Clock>,
    config: DiscoveryConfig,
    topics: RwLock<BTreeMap<String, TrackedTopic>>,
    cache: RwLock<TopicRegistry>,
    metrics: Arc<SyncMetrics>,
}

impl DiscoveryManager {
    /// Creates a manager that announces `local_address`.
    pub fn new(
        local_address: impl Into<String>,
        rendezvous: Arc<dyn Rendezvous>,
        clock: Arc<dyn Clock>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            rendezvous,
            clock,
            config,
            topics: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(TopicRegistry::new()),
            metrics: Arc::new(SyncMetrics::default()),
        }
    }

    /// Shares a metrics sink with other components.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The address this manager announces.
    #[must_use]
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Current state of `topic`.
    #[must_use]
    pub fn topic_state(&self, topic: &str) -> TopicState {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(TopicState::Unannounced, |t| t.state)
    }

    /// Registers this peer under `topic`. Re-announcing refreshes the TTL.
    ///
    /// On failure the topic stays `Announcing` and the next
    /// [`refresh`](Self::refresh) tries again.
    pub async fn announce(&self, topic: &str) -> SyncResult<()> {
        let hash = self.track(topic, |state| match state {
            TopicState::Announced => TopicState::Announced,
            _ => TopicState::Announcing,
        });
        let request = AnnounceRequest {
            address: self.local_address.clone(),
            ttl_ms: u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX),
        };

        let result = self
            .config
            .retry
            .run("announce", || self.rendezvous.announce(hash, request.clone()))
            .await;

        match result {
            Ok(record) => {
                self.cache_write().upsert(record);
                self.set_state(topic, TopicState::Announced);
                info!(topic, "announced");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_discovery_failure();
                warn!(topic, error = %e, "announce failed");
                Err(e)
            }
        }
    }

    /// Returns the live records for `topic`.
    ///
    /// Never fails: when the rendezvous is unreachable the cached records
    /// that have not expired are returned.
    pub async fn lookup(&self, topic: &str) -> Vec<DiscoveryRecord> {
        let hash = self.track(topic, |state| state);

        match self
            .config
            .retry
            .run("lookup", || self.rendezvous.lookup(hash))
            .await
        {
            Ok(records) => {
                let now = self.clock.now_ms();
                let mut cache = self.cache_write();
                cache.replace(hash, records);
                cache.lookup(&hash, now)
            }
            Err(e) => {
                self.metrics.record_discovery_failure();
                let now = self.clock.now_ms();
                let cached = self.cache_read().lookup(&hash, now);
                warn!(topic, error = %e, cached = cached.len(), "lookup failed, using cache");
                cached
            }
        }
    }

    /// Withdraws this peer's announcement for `topic`.
    ///
    /// The topic ends `Unannounced` either way; if the rendezvous could not
    /// be told, the stale record lapses with its TTL.
    pub async fn leave(&self, topic: &str) -> SyncResult<()> {
        let hash = TopicHash::from_topic(topic);
        self.set_state(topic, TopicState::Leaving);
        self.cache_write().remove(&hash, &self.local_address);

        let result = self
            .config
            .retry
            .run("leave", || self.rendezvous.leave(hash, &self.local_address))
            .await;

        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);

        if let Err(e) = &result {
            self.metrics.record_discovery_failure();
            warn!(topic, error = %e, "leave failed");
        } else {
            info!(topic, "left");
        }
        result
    }

    /// Addresses of every other peer found under any tracked topic.
    pub async fn get_peers(&self) -> BTreeSet<String> {
        let mut peers = BTreeSet::new();
        for topic in self.tracked_topics() {
            for record in self.lookup(&topic).await {
                if record.peer_address != self.local_address {
                    peers.insert(record.peer_address);
                }
            }
        }
        peers
    }

    /// Re-announces every topic that is announced or still announcing.
    ///
    /// Returns how many announcements succeeded.
    pub async fn refresh(&self) -> usize {
        let due: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, t)| matches!(t.state, TopicState::Announced | TopicState::Announcing))
            .map(|(name, _)| name.clone())
            .collect();

        let mut refreshed = 0;
        for topic in due {
            if self.announce(&topic).await.is_ok() {
                refreshed += 1;
            }
        }
        debug!(refreshed, "refreshed announcements");
        refreshed
    }

    /// Runs [`refresh`](Self::refresh) every `interval` until the handle is
    /// aborted.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.refresh().await;
                let purged = self.cache_write().purge_expired(self.clock.now_ms());
                if purged > 0 {
                    debug!(purged, "purged expired discovery records");
                }
            }
        })
    }

    fn tracked_topics(&self) -> Vec<String> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Starts tracking `topic` if needed and moves its state through `next`.
    fn track(&self, topic: &str, next: impl FnOnce(TopicState) -> TopicState) -> TopicHash {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let tracked = topics.entry(topic.to_string()).or_insert_with(|| TrackedTopic {
            hash: TopicHash::from_topic(topic),
            state: TopicState::Unannounced,
        });
        tracked.state = next(tracked.state);
        tracked.hash
    }

    fn set_state(&self, topic: &str, state: TopicState) {
        if let Some(tracked) = self
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(topic)
        {
            tracked.state = state;
        }
    }

    fn cache_read(&self) -> std::sync::RwLockReadGuard<'_, TopicRegistry> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_write(&self) -> std::sync::RwLockWriteGuard<'_, TopicRegistry> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

