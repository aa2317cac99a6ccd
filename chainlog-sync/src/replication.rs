//! Pull replication of logs between peers.
//!
//! The requester drives every session: it greets the responder, pulls
//! whatever lies between its own length and the responder's, verifies each
//! batch against the hash chain and the writer's proofs, appends it, and
//! acknowledges. Sessions always resume from the local length, so a retry
//! after a dropped connection neither loses nor duplicates entries.
//!
//! Peers live in a flat registry keyed by [`PeerId`]. Sessions with one
//! peer run one at a time; sessions with different peers run concurrently.

use chainlog_store::{Corestore, Entry, LogStore, ProvenEntry, StorageError, verify_entries};
use chainlog_types::PeerId;
use libp2p::PeerId as Libp2pPeerId;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::metrics::SyncMetrics;
use crate::p2p::{Multiaddr, P2pTransport};
use crate::protocol::{
    AckMessage, EntriesMessage, ErrorMessage, HelloAckMessage, HelloMessage, MAX_BATCH_SIZE,
    PROTOCOL_VERSION, ReplicationMessage, WantMessage,
};
use crate::retry::RetryPolicy;
use crate::state::{LogCursor, ReplicationPeer, SyncState};
use crate::transport::{Channel, ReplicationChannel};

/// Receives every entry a sync session verifies and appends.
pub trait ReplicationObserver: Send + Sync {
    fn on_replicated(&self, log_name: &str, entry: &Entry);
}

/// Configuration for a [`ReplicationManager`].
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Entries requested per `Want`.
    pub batch_size: u64,
    /// How long to wait for each reply.
    pub request_timeout: Duration,
    /// Retries for network failures within one `sync` call.
    pub retry: RetryPolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one successful `sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub log_name: String,
    /// Entries appended by this call, across retries.
    pub entries_received: u64,
    pub local_length: u64,
    pub remote_length: u64,
}

/// Responder-side memory of who is on the other end.
#[derive(Debug, Default)]
pub struct ResponderSession {
    peer: Option<PeerId>,
}

impl ResponderSession {
    /// The requester, once it has said hello.
    #[must_use]
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }
}

struct PeerSlot {
    record: ReplicationPeer,
    channel: Option<Arc<Channel>>,
    session: Arc<tokio::sync::Mutex<()>>,
}

/// Resets a peer's state if a session future is dropped mid-flight.
struct SessionGuard<'a> {
    manager: &'a ReplicationManager,
    peer_id: PeerId,
    armed: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(peer = %self.peer_id, "sync cancelled");
            self.manager.set_sync_state(self.peer_id, SyncState::Idle);
        }
    }
}

/// Replicates logs of one [`Corestore`] with remote peers.
pub struct ReplicationManager {
    local_peer_id: PeerId,
    corestore: Arc<Corestore>,
    config: ReplicationConfig,
    peers: RwLock<HashMap<PeerId, PeerSlot>>,
    observers: RwLock<Vec<Arc<dyn ReplicationObserver>>>,
    transport: Option<Arc<P2pTransport>>,
    metrics: Arc<SyncMetrics>,
}

impl ReplicationManager {
    pub fn new(local_peer_id: PeerId, corestore: Arc<Corestore>, config: ReplicationConfig) -> Self {
        Self {
            local_peer_id,
            corestore,
            config,
            peers: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            transport: None,
            metrics: Arc::new(SyncMetrics::default()),
        }
    }

    /// Dials peers added with [`add_peer`](Self::add_peer) over `transport`.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<P2pTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares a metrics sink with other components.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    #[must_use]
    pub fn corestore(&self) -> &Arc<Corestore> {
        &self.corestore
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Registers an observer for replicated entries.
    pub fn add_observer(&self, observer: Arc<dyn ReplicationObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Registers a peer reachable at a libp2p `address` ending in
    /// `/p2p/<peer id>`, dialed through the attached transport.
    pub async fn add_peer(&self, peer_id: PeerId, address: &str) -> SyncResult<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| SyncError::Network("no transport attached".to_string()))?;
        let multiaddr: Multiaddr = address
            .parse()
            .map_err(|e| SyncError::Network(format!("invalid address {address}: {e}")))?;
        let channel = transport.channel(&multiaddr).await?;
        self.add_peer_with_channel(peer_id, address, Channel::Network(channel));
        Ok(())
    }

    /// Registers a peer reachable over an explicit channel.
    ///
    /// Re-adding a known peer swaps its channel and keeps its progress.
    pub fn add_peer_with_channel(&self, peer_id: PeerId, address: &str, channel: Channel) {
        self.register(peer_id, address, Some(Arc::new(channel)));
        info!(peer = %peer_id, address, "peer added");
    }

    /// Drops a peer's record and closes its channel. Replicated entries
    /// stay.
    pub async fn remove_peer(&self, peer_id: PeerId) -> SyncResult<ReplicationPeer> {
        let slot = {
            let mut peers = self.peers_write();
            let slot = peers
                .remove(&peer_id)
                .ok_or(SyncError::PeerNotFound(peer_id))?;
            self.metrics.set_peers_connected(peers.len() as u64);
            slot
        };
        if let Some(channel) = slot.channel {
            channel.close().await;
        }
        info!(peer = %peer_id, "peer removed");
        Ok(slot.record)
    }

    /// Returns a copy of the peer's record.
    pub fn get_replication_state(&self, peer_id: PeerId) -> SyncResult<ReplicationPeer> {
        self.peers_read()
            .get(&peer_id)
            .map(|slot| slot.record.clone())
            .ok_or(SyncError::PeerNotFound(peer_id))
    }

    /// Copies of every peer record.
    #[must_use]
    pub fn peers(&self) -> Vec<ReplicationPeer> {
        self.peers_read()
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Pulls `log_name` from `peer_id` until the local copy reaches the
    /// peer's length.
    ///
    /// Network failures are retried from the last verified checkpoint.
    /// Corruption is never retried: the batch is discarded and the peer is
    /// marked [`SyncState::Stalled`].
    pub async fn sync(&self, peer_id: PeerId, log_name: &str) -> SyncResult<SyncReport> {
        let (channel, session) = {
            let peers = self.peers_read();
            let slot = peers
                .get(&peer_id)
                .ok_or(SyncError::PeerNotFound(peer_id))?;
            (slot.channel.clone(), Arc::clone(&slot.session))
        };
        let channel = channel
            .ok_or_else(|| SyncError::Network(format!("no channel to peer {peer_id}")))?;

        let _session = session.lock().await;
        self.set_sync_state(peer_id, SyncState::Syncing);
        let mut guard = SessionGuard {
            manager: self,
            peer_id,
            armed: true,
        };
        info!(peer = %peer_id, log = log_name, "sync started");

        let channel: &Channel = &channel;
        let received = &AtomicU64::new(0);
        let result = self
            .config
            .retry
            .run("sync", || self.run_session(peer_id, channel, log_name, received))
            .await;
        guard.armed = false;

        match &result {
            Ok(report) => {
                self.set_sync_state(peer_id, SyncState::Idle);
                info!(
                    peer = %peer_id,
                    log = log_name,
                    received = report.entries_received,
                    length = report.local_length,
                    "sync finished"
                );
            }
            Err(e) if e.is_retryable() => {
                self.set_sync_state(peer_id, SyncState::Disconnected);
                warn!(peer = %peer_id, log = log_name, error = %e, "sync gave up");
            }
            Err(e) => {
                self.set_sync_state(peer_id, SyncState::Stalled);
                warn!(peer = %peer_id, log = log_name, error = %e, "sync stalled");
            }
        }
        result
    }

    /// Syncs `log_name` with every registered peer concurrently.
    pub async fn sync_all(&self, log_name: &str) -> Vec<(PeerId, SyncResult<SyncReport>)> {
        let ids: Vec<PeerId> = self.peers_read().keys().copied().collect();
        futures::future::join_all(
            ids.into_iter()
                .map(move |id| async move { (id, self.sync(id, log_name).await) }),
        )
        .await
    }

    /// Answers sessions arriving on `channel` until it closes.
    pub async fn serve<C: ReplicationChannel>(&self, channel: C) -> SyncResult<()> {
        let mut session = ResponderSession::default();
        loop {
            let message = match channel.receive().await {
                Ok(message) => message,
                Err(SyncError::ChannelClosed) => break,
                Err(e) => return Err(e),
            };
            if let Some(reply) = self.handle_message(&mut session, message) {
                if channel.send(reply).await.is_err() {
                    break;
                }
            }
        }
        debug!(peer = ?session.peer, "serve loop ended");
        self.end_session(&session);
        Ok(())
    }

    /// Answers requests arriving on a libp2p transport until it stops.
    pub async fn serve_network(&self, transport: &P2pTransport) -> SyncResult<()> {
        let mut sessions: HashMap<Libp2pPeerId, ResponderSession> = HashMap::new();
        while let Some(request) = transport.recv_request().await {
            let session = sessions.entry(request.peer).or_default();
            // Request-response needs an answer even to a parting Error.
            let reply = self
                .handle_message(session, request.message)
                .unwrap_or_else(|| ErrorMessage::new(ErrorMessage::UNEXPECTED, "session ended").into());
            transport
                .send_response(request.response_channel, reply)
                .await?;
        }
        for session in sessions.values() {
            self.end_session(session);
        }
        Ok(())
    }

    /// Forgets a requester once its connection is gone, unless it is also a
    /// peer this side syncs from.
    fn end_session(&self, session: &ResponderSession) {
        let Some(peer_id) = session.peer else {
            return;
        };
        let mut peers = self.peers_write();
        if peers.get(&peer_id).is_some_and(|slot| slot.channel.is_none()) {
            peers.remove(&peer_id);
            self.metrics.set_peers_connected(peers.len() as u64);
            debug!(peer = %peer_id, "requester disconnected");
        }
    }

    /// Computes the responder's answer to one message. `None` means the
    /// requester ended the session and expects nothing back.
    pub fn handle_message(
        &self,
        session: &mut ResponderSession,
        message: ReplicationMessage,
    ) -> Option<ReplicationMessage> {
        match message {
            ReplicationMessage::Hello(hello) => Some(self.on_hello(session, hello)),
            ReplicationMessage::Want(want) => Some(self.on_want(want)),
            ReplicationMessage::Ack(ack) => Some(self.on_ack(session, ack)),
            ReplicationMessage::Error(e) => {
                warn!(peer = ?session.peer, code = e.code, reason = %e.reason, "peer ended session");
                None
            }
            ReplicationMessage::HelloAck(_) | ReplicationMessage::Entries(_) => Some(
                ErrorMessage::new(ErrorMessage::UNEXPECTED, "responder received a reply").into(),
            ),
        }
    }

    fn on_hello(&self, session: &mut ResponderSession, hello: HelloMessage) -> ReplicationMessage {
        if hello.version != PROTOCOL_VERSION {
            return ErrorMessage::version_mismatch(PROTOCOL_VERSION, hello.version).into();
        }
        session.peer = Some(hello.peer_id);
        self.register(hello.peer_id, "", None);

        let Some(log) = self.corestore.find(&hello.log_name) else {
            return ErrorMessage::unknown_log(&hello.log_name).into();
        };
        if let Some(key) = hello.identity_key {
            if key != log.identity() {
                return ErrorMessage::new(
                    ErrorMessage::IDENTITY_MISMATCH,
                    format!("log {} is written by {}", hello.log_name, log.identity()),
                )
                .into();
            }
        }

        let length = log.length();
        self.update_cursor(hello.peer_id, &hello.log_name, |cursor| {
            cursor.remote_length = hello.length;
            cursor.verified_up_to = length.min(hello.length);
        });
        debug!(peer = %hello.peer_id, log = %hello.log_name, remote = hello.length, length, "hello");

        ReplicationMessage::HelloAck(HelloAckMessage {
            version: PROTOCOL_VERSION,
            identity_key: log.identity(),
            length,
        })
    }

    fn on_want(&self, want: WantMessage) -> ReplicationMessage {
        let Some(log) = self.corestore.find(&want.log_name) else {
            return ErrorMessage::unknown_log(&want.log_name).into();
        };
        let length = log.length();
        if want.from > want.to || want.from > length {
            return ErrorMessage::new(
                ErrorMessage::OUT_OF_RANGE,
                format!("cannot serve [{}, {}) of {length}", want.from, want.to),
            )
            .into();
        }
        let to = want.to.min(length).min(want.from + MAX_BATCH_SIZE);
        match log.proven_range(want.from, to) {
            Ok(entries) => ReplicationMessage::Entries(EntriesMessage {
                log_name: want.log_name,
                from: want.from,
                entries,
            }),
            Err(e) => ErrorMessage::internal(e.to_string()).into(),
        }
    }

    fn on_ack(&self, session: &ResponderSession, ack: AckMessage) -> ReplicationMessage {
        let length = self
            .corestore
            .find(&ack.log_name)
            .map_or(0, |log| log.length());
        if let Some(peer) = session.peer {
            self.update_cursor(peer, &ack.log_name, |cursor| {
                cursor.remote_length = ack.verified_up_to;
                cursor.verified_up_to = length.min(ack.verified_up_to);
            });
        }
        ReplicationMessage::Ack(AckMessage {
            log_name: ack.log_name,
            verified_up_to: length,
        })
    }

    async fn run_session(
        &self,
        peer_id: PeerId,
        channel: &Channel,
        log_name: &str,
        received: &AtomicU64,
    ) -> SyncResult<SyncReport> {
        let local = self.corestore.find(log_name);
        let mut hello = HelloMessage::new(self.local_peer_id, log_name);
        if let Some(log) = &local {
            hello = hello.with_log(log.identity(), log.length());
        }

        let ack = match self
            .request(channel, ReplicationMessage::Hello(hello))
            .await?
        {
            ReplicationMessage::HelloAck(ack) => ack,
            other => return Err(unexpected("HelloAck", &other)),
        };
        if ack.version != PROTOCOL_VERSION {
            return Err(SyncError::Protocol(format!(
                "peer speaks version {}, expected {PROTOCOL_VERSION}",
                ack.version
            )));
        }

        let log = match local {
            Some(log) if log.identity() != ack.identity_key => {
                return Err(SyncError::Storage(StorageError::IdentityMismatch {
                    name: log_name.to_string(),
                    existing: log.identity(),
                    requested: ack.identity_key,
                }));
            }
            Some(log) => log,
            None => self
                .corestore
                .get_replica(log_name, ack.identity_key)
                .map_err(SyncError::from_storage)?,
        };

        let remote_length = ack.length;
        let start_length = log.length();
        self.update_cursor(peer_id, log_name, |cursor| {
            cursor.remote_length = remote_length;
            cursor.verified_up_to = start_length.min(remote_length);
        });

        let mut acknowledged = false;
        while log.length() < remote_length {
            let from = log.length();
            let to = remote_length.min(from + self.config.batch_size.max(1));
            let want = WantMessage {
                log_name: log_name.to_string(),
                from,
                to,
            };
            let batch = match self.request(channel, ReplicationMessage::Want(want)).await? {
                ReplicationMessage::Entries(batch) => batch,
                other => return Err(unexpected("Entries", &other)),
            };

            let appended = match self.append_batch(&log, from, to, &batch) {
                Ok(range) => range,
                Err(e) => {
                    if matches!(e, SyncError::Corruption { .. }) {
                        self.metrics.record_verification_failure();
                        let notice = ErrorMessage::new(ErrorMessage::CORRUPTION, e.to_string());
                        let _ = channel.send(notice.into()).await;
                    }
                    return Err(e);
                }
            };

            // A concurrent session may already have committed part of the batch.
            let fresh: Vec<&ProvenEntry> = batch
                .entries
                .iter()
                .filter(|p| appended.contains(&p.entry.index))
                .collect();
            let bytes = fresh.iter().map(|p| p.entry.payload.len() as u64).sum();
            self.notify(log_name, &fresh);
            self.metrics.record_batch(fresh.len() as u64, bytes);
            received.fetch_add(fresh.len() as u64, Ordering::Relaxed);
            let new_length = log.length();
            self.update_cursor(peer_id, log_name, |cursor| {
                cursor.verified_up_to = new_length;
            });
            debug!(peer = %peer_id, log = log_name, from, to = new_length, "batch verified");
            self.acknowledge(channel, log_name, new_length).await?;
            acknowledged = true;
        }

        if !acknowledged {
            self.acknowledge(channel, log_name, log.length()).await?;
        }
        self.metrics.record_session_completed();

        Ok(SyncReport {
            log_name: log_name.to_string(),
            entries_received: received.load(Ordering::Relaxed),
            local_length: log.length(),
            remote_length,
        })
    }

    /// Checks a batch against what was asked for and the hash chain, then
    /// hands it to the log for link and proof verification.
    fn append_batch(
        &self,
        log: &LogStore,
        from: u64,
        to: u64,
        batch: &EntriesMessage,
    ) -> SyncResult<Range<u64>> {
        if batch.log_name != log.name() || batch.from != from {
            return Err(SyncError::Protocol(format!(
                "asked for {}@{from}, got {}@{}",
                log.name(),
                batch.log_name,
                batch.from
            )));
        }
        let count = batch.entries.len() as u64;
        if count == 0 || count > to - from {
            return Err(SyncError::Protocol(format!(
                "asked for {} entries, got {count}",
                to - from
            )));
        }

        let copy: Vec<Entry> = batch.entries.iter().map(|p| p.entry.clone()).collect();
        if copy.first().map(|e| e.index) != Some(from) || !verify_entries(&copy) {
            return Err(SyncError::Corruption {
                index: from,
                reason: "batch does not form a valid chain".to_string(),
            });
        }

        log.append_verified(&batch.entries)
            .map_err(SyncError::from_storage)
    }

    async fn request(
        &self,
        channel: &Channel,
        message: ReplicationMessage,
    ) -> SyncResult<ReplicationMessage> {
        let awaiting = Awaiting::of(&message);
        channel.send(message).await?;
        let reply = tokio::time::timeout(
            self.config.request_timeout,
            receive_reply(channel, awaiting.as_ref()),
        )
        .await
        .map_err(|_| SyncError::Timeout)??;
        match reply {
            ReplicationMessage::Error(e) => Err(SyncError::Rejected {
                code: e.code,
                reason: e.reason,
            }),
            other => Ok(other),
        }
    }

    async fn acknowledge(&self, channel: &Channel, log_name: &str, length: u64) -> SyncResult<()> {
        let ack = AckMessage {
            log_name: log_name.to_string(),
            verified_up_to: length,
        };
        match self.request(channel, ReplicationMessage::Ack(ack)).await? {
            ReplicationMessage::Ack(_) => Ok(()),
            other => Err(unexpected("Ack", &other)),
        }
    }

    fn notify(&self, log_name: &str, entries: &[&ProvenEntry]) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            for proven in entries {
                observer.on_replicated(log_name, &proven.entry);
            }
        }
    }

    fn register(&self, peer_id: PeerId, address: &str, channel: Option<Arc<Channel>>) {
        let mut peers = self.peers_write();
        match peers.get_mut(&peer_id) {
            Some(slot) => {
                if !address.is_empty() {
                    slot.record.address = address.to_string();
                }
                if channel.is_some() {
                    slot.channel = channel;
                    slot.record.sync_state = SyncState::Idle;
                }
            }
            None => {
                peers.insert(
                    peer_id,
                    PeerSlot {
                        record: ReplicationPeer::new(peer_id, address),
                        channel,
                        session: Arc::new(tokio::sync::Mutex::new(())),
                    },
                );
            }
        }
        self.metrics.set_peers_connected(peers.len() as u64);
    }

    fn set_sync_state(&self, peer_id: PeerId, state: SyncState) {
        if let Some(slot) = self.peers_write().get_mut(&peer_id) {
            slot.record.sync_state = state;
        }
    }

    fn update_cursor(&self, peer_id: PeerId, log_name: &str, update: impl FnOnce(&mut LogCursor)) {
        if let Some(slot) = self.peers_write().get_mut(&peer_id) {
            update(slot.record.cursor_mut(log_name));
        }
    }

    fn peers_read(&self) -> RwLockReadGuard<'_, HashMap<PeerId, PeerSlot>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn peers_write(&self) -> RwLockWriteGuard<'_, HashMap<PeerId, PeerSlot>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The shape of reply that answers the request in flight.
///
/// A request that timed out may still be answered later. Its reply then sits
/// ahead of the answer to the retried request and must be skipped.
enum Awaiting {
    HelloAck,
    Entries { log_name: String, from: u64 },
    Ack { log_name: String },
}

impl Awaiting {
    fn of(request: &ReplicationMessage) -> Option<Self> {
        match request {
            ReplicationMessage::Hello(_) => Some(Self::HelloAck),
            ReplicationMessage::Want(want) => Some(Self::Entries {
                log_name: want.log_name.clone(),
                from: want.from,
            }),
            ReplicationMessage::Ack(ack) => Some(Self::Ack {
                log_name: ack.log_name.clone(),
            }),
            _ => None,
        }
    }

    fn answered_by(&self, reply: &ReplicationMessage) -> bool {
        match (self, reply) {
            (_, ReplicationMessage::Error(_)) | (Self::HelloAck, ReplicationMessage::HelloAck(_)) => {
                true
            }
            (Self::Entries { log_name, from }, ReplicationMessage::Entries(batch)) => {
                &batch.log_name == log_name && batch.from == *from
            }
            (Self::Ack { log_name }, ReplicationMessage::Ack(ack)) => &ack.log_name == log_name,
            _ => false,
        }
    }
}

async fn receive_reply(
    channel: &Channel,
    awaiting: Option<&Awaiting>,
) -> SyncResult<ReplicationMessage> {
    loop {
        let reply = channel.receive().await?;
        if awaiting.is_none_or(|a| a.answered_by(&reply)) {
            return Ok(reply);
        }
        debug!(reply = kind(&reply), "skipping stale reply");
    }
}

fn kind(message: &ReplicationMessage) -> &'static str {
    match message {
        ReplicationMessage::Hello(_) => "Hello",
        ReplicationMessage::HelloAck(_) => "HelloAck",
        ReplicationMessage::Want(_) => "Want",
        ReplicationMessage::Entries(_) => "Entries",
        ReplicationMessage::Ack(_) => "Ack",
        ReplicationMessage::Error(_) => "Error",
    }
}

fn unexpected(wanted: &str, got: &ReplicationMessage) -> SyncError {
    SyncError::Protocol(format!("expected {wanted}, got {}", kind(got)))
}
