use chainlog_rendezvous::{HealthResponse, RendezvousConfig, RendezvousState, build_router};
use chainlog_sync::{
    AnnounceRequest, DiscoveryConfig, DiscoveryManager, HttpRendezvous, ManualClock, Rendezvous,
    RetryPolicy, SyncError, TopicState,
};
use chainlog_types::TopicHash;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const START: u64 = 1_700_000_000_000;

struct Server {
    base: String,
    clock: Arc<ManualClock>,
    state: Arc<RendezvousState>,
}

/// Spin up the HTTP server on an OS-assigned port.
async fn spawn_server() -> Server {
    spawn_server_with(Duration::from_secs(60)).await
}

async fn spawn_server_with(max_ttl: Duration) -> Server {
    let clock = Arc::new(ManualClock::new(START));
    let config = RendezvousConfig {
        max_ttl,
        ..RendezvousConfig::default()
    };
    let state = Arc::new(RendezvousState::new(config, clock.clone()));
    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Server {
        base: format!("http://127.0.0.1:{port}"),
        clock,
        state,
    }
}

fn client(server: &Server) -> HttpRendezvous {
    HttpRendezvous::new(&server.base, Duration::from_secs(5)).unwrap()
}

fn announce(address: &str, ttl_ms: u64) -> AnnounceRequest {
    AnnounceRequest {
        address: address.to_string(),
        ttl_ms,
    }
}

#[tokio::test]
async fn announce_then_lookup() {
    let server = spawn_server().await;
    let rendezvous = client(&server);
    let topic = TopicHash::from_topic("books");

    let record = rendezvous
        .announce(topic, announce("/ip4/10.0.0.1/udp/4001/quic-v1", 5_000))
        .await
        .unwrap();
    assert_eq!(record.announced_at, START);
    assert_eq!(record.ttl_ms, 5_000);
    assert_eq!(record.topic_hash, topic);

    let records = rendezvous.lookup(topic).await.unwrap();
    assert_eq!(records, vec![record]);
    assert!(
        rendezvous
            .lookup(TopicHash::from_topic("films"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn records_expire_with_server_clock() {
    let server = spawn_server().await;
    let rendezvous = client(&server);
    let topic = TopicHash::from_topic("books");
    rendezvous.announce(topic, announce("a", 1_000)).await.unwrap();

    server.clock.advance(Duration::from_millis(999));
    assert_eq!(rendezvous.lookup(topic).await.unwrap().len(), 1);

    server.clock.advance(Duration::from_millis(2));
    assert!(rendezvous.lookup(topic).await.unwrap().is_empty());
    assert_eq!(server.state.purge_expired(), 1);
    assert!(server.state.is_empty());
}

#[tokio::test]
async fn ttl_is_capped() {
    let server = spawn_server().await;
    let record = client(&server)
        .announce(TopicHash::from_topic("books"), announce("a", 3_600_000))
        .await
        .unwrap();
    assert_eq!(record.ttl_ms, 60_000);
}

#[tokio::test]
async fn cap_beyond_u64_millis_does_not_wrap() {
    // 2^64 ms rounded up to whole seconds; its low 64 bits are 384 ms.
    let server = spawn_server_with(Duration::from_secs(18_446_744_073_709_552)).await;
    let record = client(&server)
        .announce(TopicHash::from_topic("books"), announce("a", 3_600_000))
        .await
        .unwrap();
    assert_eq!(record.ttl_ms, 3_600_000);
}

#[tokio::test]
async fn leave_removes_the_address() {
    let server = spawn_server().await;
    let rendezvous = client(&server);
    let topic = TopicHash::from_topic("books");
    let address = "/ip4/10.0.0.1/udp/4001/quic-v1";
    rendezvous.announce(topic, announce(address, 5_000)).await.unwrap();
    rendezvous.announce(topic, announce("other", 5_000)).await.unwrap();

    rendezvous.leave(topic, address).await.unwrap();
    let left: Vec<String> = rendezvous
        .lookup(topic)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.peer_address)
        .collect();
    assert_eq!(left, vec!["other".to_string()]);

    // Leaving twice is harmless.
    rendezvous.leave(topic, address).await.unwrap();
}

#[tokio::test]
async fn malformed_requests_are_refused() {
    let server = spawn_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("{}/api/v1/topics/not-hex", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let topic = TopicHash::from_topic("books").to_hex();
    let resp = http
        .post(format!("{}/api/v1/topics/{topic}", server.base))
        .json(&announce("a", 0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ttl_ms"));

    let resp = http
        .get(format!("{}/api/v1/nonexistent", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn health_counts_records() {
    let server = spawn_server().await;
    let rendezvous = client(&server);
    rendezvous
        .announce(TopicHash::from_topic("books"), announce("a", 5_000))
        .await
        .unwrap();
    rendezvous
        .announce(TopicHash::from_topic("books"), announce("b", 5_000))
        .await
        .unwrap();

    let health: HealthResponse = reqwest::get(format!("{}/api/v1/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        health,
        HealthResponse {
            status: "ok".to_string(),
            topics: 1,
            records: 2,
        }
    );
}

#[tokio::test]
async fn unreachable_service_is_reported_as_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let rendezvous =
        HttpRendezvous::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
    let err = rendezvous
        .lookup(TopicHash::from_topic("books"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DiscoveryUnavailable(_)));
}

#[tokio::test]
async fn discovery_managers_find_each_other() {
    let server = spawn_server().await;
    let manager = |address: &str| {
        DiscoveryManager::new(
            address,
            Arc::new(client(&server)),
            server.clock.clone(),
            DiscoveryConfig {
                ttl: Duration::from_secs(30),
                retry: RetryPolicy::none(),
            },
        )
    };
    let a = manager("peer-a");
    let b = manager("peer-b");

    a.announce("books").await.unwrap();
    b.announce("books").await.unwrap();
    assert_eq!(a.topic_state("books"), TopicState::Announced);

    assert_eq!(a.get_peers().await, BTreeSet::from(["peer-b".to_string()]));
    assert_eq!(b.get_peers().await, BTreeSet::from(["peer-a".to_string()]));

    b.leave("books").await.unwrap();
    assert!(a.get_peers().await.is_empty());
}
