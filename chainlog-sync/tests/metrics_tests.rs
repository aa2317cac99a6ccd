use chainlog_sync::{MetricsSnapshot, SyncMetrics, init_metrics};
use pretty_assertions::assert_eq;

#[test]
fn snapshot_reflects_recordings() {
    init_metrics();
    let metrics = SyncMetrics::default();
    assert_eq!(metrics.snapshot(), MetricsSnapshot::default());

    metrics.record_batch(10, 1_024);
    metrics.record_batch(2, 6);
    metrics.record_verification_failure();
    metrics.record_discovery_failure();
    metrics.record_session_completed();
    metrics.set_peers_connected(3);
    metrics.set_peers_connected(2);

    assert_eq!(
        metrics.snapshot(),
        MetricsSnapshot {
            entries_replicated: 12,
            bytes_replicated: 1_030,
            peers_connected: 2,
            verification_failures: 1,
            discovery_failures: 1,
            sessions_completed: 1,
        }
    );
}
