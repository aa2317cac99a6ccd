//! HTTP rendezvous for chainlog discovery.
//!
//! Peers announce an address under a topic hash with a TTL, look up who else
//! announced, and withdraw when they leave. The service stamps every
//! announcement with its own clock and never keeps a record past its TTL.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/api/v1/topics/{topic}` | announce `{address, ttl_ms}` |
//! | `GET` | `/api/v1/topics/{topic}` | live records |
//! | `DELETE` | `/api/v1/topics/{topic}/peers/{address}` | leave |
//! | `GET` | `/api/v1/health` | counts |

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use chainlog_sync::{AnnounceRequest, Clock, DiscoveryRecord, LookupResponse, TopicRegistry};
use chainlog_types::TopicHash;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Service limits.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Longer TTLs are cut down to this.
    pub max_ttl: Duration,
    /// How often expired records are dropped from memory.
    pub purge_interval: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(600),
            purge_interval: Duration::from_secs(30),
        }
    }
}

/// Records held by the service.
pub struct RendezvousState {
    registry: Mutex<TopicRegistry>,
    clock: Arc<dyn Clock>,
    config: RendezvousConfig,
}

impl RendezvousState {
    pub fn new(config: RendezvousConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Mutex::new(TopicRegistry::new()),
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    /// Drops expired records; returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.registry().purge_expired(now)
    }

    /// Records held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn announce(&self, topic: TopicHash, request: AnnounceRequest) -> DiscoveryRecord {
        let max_ttl = u64::try_from(self.config.max_ttl.as_millis()).unwrap_or(u64::MAX);
        let record = DiscoveryRecord {
            topic_hash: topic,
            peer_address: request.address,
            announced_at: self.clock.now_ms(),
            ttl_ms: request.ttl_ms.min(max_ttl),
        };
        self.registry().upsert(record.clone());
        record
    }

    fn lookup(&self, topic: &TopicHash) -> Vec<DiscoveryRecord> {
        let now = self.clock.now_ms();
        self.registry().lookup(topic, now)
    }

    fn leave(&self, topic: &TopicHash, address: &str) -> bool {
        self.registry().remove(topic, address)
    }

    fn registry(&self) -> MutexGuard<'_, TopicRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Body of `GET /api/v1/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub topics: usize,
    pub records: usize,
}

/// A request the service refuses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

fn parse_topic(raw: &str) -> Result<TopicHash, ApiError> {
    TopicHash::from_hex(raw).map_err(|e| ApiError::bad_request(format!("invalid topic: {e}")))
}

async fn announce_handler(
    State(state): State<Arc<RendezvousState>>,
    Path(topic): Path<String>,
    Json(request): Json<AnnounceRequest>,
) -> Result<Json<DiscoveryRecord>, ApiError> {
    let topic = parse_topic(&topic)?;
    if request.address.is_empty() {
        return Err(ApiError::bad_request("address must not be empty"));
    }
    if request.ttl_ms == 0 {
        return Err(ApiError::bad_request("ttl_ms must be positive"));
    }
    let record = state.announce(topic, request);
    debug!(topic = %record.topic_hash, address = %record.peer_address, ttl_ms = record.ttl_ms, "announce");
    Ok(Json(record))
}

async fn lookup_handler(
    State(state): State<Arc<RendezvousState>>,
    Path(topic): Path<String>,
) -> Result<Json<LookupResponse>, ApiError> {
    let topic = parse_topic(&topic)?;
    Ok(Json(LookupResponse {
        records: state.lookup(&topic),
    }))
}

async fn leave_handler(
    State(state): State<Arc<RendezvousState>>,
    Path((topic, address)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let topic = parse_topic(&topic)?;
    let removed = state.leave(&topic, &address);
    debug!(%topic, address = %address, removed, "leave");
    Ok(StatusCode::NO_CONTENT)
}

async fn health_handler(State(state): State<Arc<RendezvousState>>) -> Json<HealthResponse> {
    let registry = state.registry();
    Json(HealthResponse {
        status: "ok".to_string(),
        topics: registry.topic_count(),
        records: registry.len(),
    })
}

/// Build the HTTP API router over `state`.
pub fn build_router(state: Arc<RendezvousState>) -> Router {
    Router::new()
        .route(
            "/api/v1/topics/{topic}",
            get(lookup_handler).post(announce_handler),
        )
        .route("/api/v1/topics/{topic}/peers/{address}", delete(leave_handler))
        .route("/api/v1/health", get(health_handler))
        .with_state(state)
}

/// Purges expired records every `interval` until aborted.
pub fn spawn_purge(state: Arc<RendezvousState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = state.purge_expired();
            if purged > 0 {
                info!(purged, remaining = state.len(), "purged expired records");
            }
        }
    })
}
