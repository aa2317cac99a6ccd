//! Replication and discovery counters.
//!
//! Every recording goes to the global `metrics` recorder (if the host
//! installed one) and to an in-process [`SyncMetrics`] that can be read back
//! without any exporter.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Registers metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(
        "chainlog.log.entries_appended",
        "Entries appended to local logs, locally written or replicated"
    );
    describe_counter!(
        "chainlog.log.verification_failures",
        "Replicated batches rejected by a log"
    );
    describe_counter!(
        "chainlog.replication.entries",
        "Entries pulled from peers and appended"
    );
    describe_counter!(
        "chainlog.replication.bytes",
        "Payload bytes pulled from peers"
    );
    describe_counter!(
        "chainlog.replication.verification_failures",
        "Sessions stalled by hash-chain or proof failures"
    );
    describe_gauge!("chainlog.replication.peers", "Peers currently registered");
    describe_counter!(
        "chainlog.discovery.failures",
        "Rendezvous calls that failed after retries"
    );
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub entries_replicated: u64,
    pub bytes_replicated: u64,
    pub peers_connected: u64,
    pub verification_failures: u64,
    pub discovery_failures: u64,
    pub sessions_completed: u64,
}

/// In-process counters shared by the replication and discovery managers.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    entries_replicated: AtomicU64,
    bytes_replicated: AtomicU64,
    peers_connected: AtomicU64,
    verification_failures: AtomicU64,
    discovery_failures: AtomicU64,
    sessions_completed: AtomicU64,
}

impl SyncMetrics {
    pub fn record_batch(&self, entries: u64, bytes: u64) {
        self.entries_replicated.fetch_add(entries, Ordering::Relaxed);
        self.bytes_replicated.fetch_add(bytes, Ordering::Relaxed);
        counter!("chainlog.replication.entries").increment(entries);
        counter!("chainlog.replication.bytes").increment(bytes);
    }

    pub fn record_verification_failure(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
        counter!("chainlog.replication.verification_failures").increment(1);
    }

    pub fn record_discovery_failure(&self) {
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
        counter!("chainlog.discovery.failures").increment(1);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_peers_connected(&self, peers: u64) {
        self.peers_connected.store(peers, Ordering::Relaxed);
        gauge!("chainlog.replication.peers").set(peers as f64);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_replicated: self.entries_replicated.load(Ordering::Relaxed),
            bytes_replicated: self.bytes_replicated.load(Ordering::Relaxed),
            peers_connected: self.peers_connected.load(Ordering::Relaxed),
            verification_failures: self.verification_failures.load(Ordering::Relaxed),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
        }
    }
}
