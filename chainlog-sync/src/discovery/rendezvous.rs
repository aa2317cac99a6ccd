//! Rendezvous backends: where announcements are stored and looked up.

use async_trait::async_trait;
use chainlog_types::TopicHash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::clock::Clock;
use super::registry::{DiscoveryRecord, TopicRegistry};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{AnnounceRequest, LookupResponse};

/// A service that remembers which addresses serve which topics.
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Registers (or refreshes) `request.address` under `topic`.
    async fn announce(&self, topic: TopicHash, request: AnnounceRequest)
    -> SyncResult<DiscoveryRecord>;

    /// Returns the live records for `topic`.
    async fn lookup(&self, topic: TopicHash) -> SyncResult<Vec<DiscoveryRecord>>;

    /// Removes `address` from `topic`.
    async fn leave(&self, topic: TopicHash, address: &str) -> SyncResult<()>;
}

/// An in-process rendezvous shared by every manager holding a clone.
///
/// Can be switched unavailable to simulate an unreachable service.
#[derive(Clone)]
pub struct MemoryRendezvous {
    registry: Arc<Mutex<TopicRegistry>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

impl MemoryRendezvous {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(TopicRegistry::new())),
            clock,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every call fail with [`SyncError::DiscoveryUnavailable`] while
    /// `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drops expired records; returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.registry().purge_expired(now)
    }

    fn registry(&self) -> MutexGuard<'_, TopicRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> SyncResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::DiscoveryUnavailable(
                "rendezvous unreachable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Rendezvous for MemoryRendezvous {
    async fn announce(
        &self,
        topic: TopicHash,
        request: AnnounceRequest,
    ) -> SyncResult<DiscoveryRecord> {
        self.ensure_available()?;
        let record = DiscoveryRecord {
            topic_hash: topic,
            peer_address: request.address,
            announced_at: self.clock.now_ms(),
            ttl_ms: request.ttl_ms,
        };
        self.registry().upsert(record.clone());
        Ok(record)
    }

    async fn lookup(&self, topic: TopicHash) -> SyncResult<Vec<DiscoveryRecord>> {
        self.ensure_available()?;
        Ok(self.registry().lookup(&topic, self.clock.now_ms()))
    }

    async fn leave(&self, topic: TopicHash, address: &str) -> SyncResult<()> {
        self.ensure_available()?;
        self.registry().remove(&topic, address);
        Ok(())
    }
}

/// Client of the chainlog rendezvous HTTP service.
pub struct HttpRendezvous {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRendezvous {
    /// Creates a client for the service at `base_url` (e.g.
    /// `http://127.0.0.1:7700`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn topic_url(&self, topic: &TopicHash) -> String {
        format!("{}/api/v1/topics/{}", self.base_url, topic.to_hex())
    }
}

fn unavailable(e: reqwest::Error) -> SyncError {
    SyncError::DiscoveryUnavailable(e.to_string())
}

fn check_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_server_error() {
        Err(SyncError::DiscoveryUnavailable(format!(
            "rendezvous returned {status}"
        )))
    } else if !status.is_success() {
        Err(SyncError::Protocol(format!("rendezvous returned {status}")))
    } else {
        Ok(response)
    }
}

#[async_trait]
impl Rendezvous for HttpRendezvous {
    async fn announce(
        &self,
        topic: TopicHash,
        request: AnnounceRequest,
    ) -> SyncResult<DiscoveryRecord> {
        let response = self
            .client
            .post(self.topic_url(&topic))
            .json(&request)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(response)?
            .json::<DiscoveryRecord>()
            .await
            .map_err(|e| SyncError::Protocol(format!("bad announce response: {e}")))
    }

    async fn lookup(&self, topic: TopicHash) -> SyncResult<Vec<DiscoveryRecord>> {
        let response = self
            .client
            .get(self.topic_url(&topic))
            .send()
            .await
            .map_err(unavailable)?;
        let body = check_status(response)?
            .json::<LookupResponse>()
            .await
            .map_err(|e| SyncError::Protocol(format!("bad lookup response: {e}")))?;
        Ok(body.records)
    }

    async fn leave(&self, topic: TopicHash, address: &str) -> SyncResult<()> {
        let url = format!(
            "{}/peers/{}",
            self.topic_url(&topic),
            urlencoding::encode(address)
        );
        let response = self.client.delete(url).send().await.map_err(unavailable)?;
        check_status(response)?;
        Ok(())
    }
}
