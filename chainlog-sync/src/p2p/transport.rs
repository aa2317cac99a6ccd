//! P2P transport implementation using a libp2p swarm.

use crate::error::{SyncError, SyncResult};
use crate::p2p::behaviour::{
    ReplicationBehaviour, ReplicationBehaviourEvent, extract_peer_id, remove_peer_id_suffix,
};
use crate::p2p::channel::NetworkChannel;
use crate::protocol::ReplicationMessage;
use futures::StreamExt;
use libp2p::{
    Multiaddr, PeerId as Libp2pPeerId, Swarm,
    identity::Keypair,
    request_response::{self, OutboundRequestId, ResponseChannel},
    swarm::SwarmEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Configuration for the P2P transport.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Listen addresses.
    pub listen_addrs: Vec<Multiaddr>,
    /// Connection idle timeout.
    pub idle_timeout: Duration,
    /// How long a request may wait for its response.
    pub request_timeout: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![Multiaddr::empty()
                .with(libp2p::multiaddr::Protocol::Ip4([0, 0, 0, 0].into()))
                .with(libp2p::multiaddr::Protocol::Udp(0))
                .with(libp2p::multiaddr::Protocol::QuicV1)],
            idle_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A request received from a remote peer, waiting for its response.
pub struct IncomingRequest {
    /// The libp2p peer that sent the request.
    pub peer: Libp2pPeerId,
    /// The request message.
    pub message: ReplicationMessage,
    /// Channel to send the response.
    pub response_channel: ResponseChannel<ReplicationMessage>,
}

/// Command sent to the swarm event loop.
enum SwarmCommand {
    SendRequest {
        peer: Libp2pPeerId,
        message: ReplicationMessage,
        response_tx: oneshot::Sender<SyncResult<ReplicationMessage>>,
    },
    SendResponse {
        channel: ResponseChannel<ReplicationMessage>,
        message: ReplicationMessage,
    },
    AddAddress {
        peer: Libp2pPeerId,
        address: Multiaddr,
    },
    Shutdown,
}

/// P2P transport using libp2p over QUIC.
pub struct P2pTransport {
    libp2p_peer_id: Libp2pPeerId,
    keypair: Keypair,
    config: P2pConfig,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    command_tx: Option<mpsc::Sender<SwarmCommand>>,
    incoming_rx: Mutex<mpsc::Receiver<IncomingRequest>>,
    /// Sender for incoming requests (cloned into the event loop).
    incoming_tx: mpsc::Sender<IncomingRequest>,
    running: Arc<AtomicBool>,
}

impl P2pTransport {
    /// Creates a new P2P transport with a random keypair.
    pub fn new(config: P2pConfig) -> Self {
        Self::with_keypair(Keypair::generate_ed25519(), config)
    }

    /// Creates a new P2P transport with a specific keypair.
    pub fn with_keypair(keypair: Keypair, config: P2pConfig) -> Self {
        let libp2p_peer_id = Libp2pPeerId::from(keypair.public());
        let (incoming_tx, incoming_rx) = mpsc::channel(32);

        Self {
            libp2p_peer_id,
            keypair,
            config,
            listen_addrs: Arc::new(RwLock::new(Vec::new())),
            command_tx: None,
            incoming_rx: Mutex::new(incoming_rx),
            incoming_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns our libp2p peer ID.
    pub fn libp2p_peer_id(&self) -> Libp2pPeerId {
        self.libp2p_peer_id
    }

    /// Returns whether the event loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Addresses the swarm is listening on, each with our `/p2p/` suffix.
    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs
            .read()
            .await
            .iter()
            .map(|a| {
                a.clone()
                    .with(libp2p::multiaddr::Protocol::P2p(self.libp2p_peer_id))
            })
            .collect()
    }

    /// Starts listening and spawns the swarm event loop.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut swarm = self.create_swarm()?;
        for addr in &self.config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| SyncError::Network(format!("failed to listen on {addr}: {e}")))?;
        }

        self.running.store(true, Ordering::SeqCst);
        let (command_tx, command_rx) = mpsc::channel(32);
        self.command_tx = Some(command_tx);

        tokio::spawn(Self::run_event_loop(
            swarm,
            command_rx,
            self.incoming_tx.clone(),
            Arc::clone(&self.listen_addrs),
            Arc::clone(&self.running),
        ));

        info!("P2P transport started, libp2p peer ID: {}", self.libp2p_peer_id);
        Ok(())
    }

    /// Stops the event loop. Pending requests fail.
    pub async fn stop(&self) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(SwarmCommand::Shutdown).await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("P2P transport stopped");
    }

    /// Opens a replication channel to the peer at `address`, which must end
    /// in `/p2p/<peer id>`.
    pub async fn channel(self: &Arc<Self>, address: &Multiaddr) -> SyncResult<NetworkChannel> {
        let peer = extract_peer_id(address)
            .ok_or_else(|| SyncError::Network(format!("address has no /p2p/ peer id: {address}")))?;
        self.add_peer_address(peer, remove_peer_id_suffix(address))
            .await?;
        Ok(NetworkChannel::new(Arc::clone(self), peer))
    }

    /// Registers a dialable address for a peer.
    pub async fn add_peer_address(&self, peer: Libp2pPeerId, address: Multiaddr) -> SyncResult<()> {
        self.command(SwarmCommand::AddAddress { peer, address }).await
    }

    /// Sends a request to a peer and waits for the response.
    pub async fn send_request(
        &self,
        peer: Libp2pPeerId,
        message: ReplicationMessage,
    ) -> SyncResult<ReplicationMessage> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command(SwarmCommand::SendRequest {
            peer,
            message,
            response_tx,
        })
        .await?;

        response_rx
            .await
            .map_err(|_| SyncError::Network("response channel closed".to_string()))?
    }

    /// Receives the next incoming request. Returns `None` once the
    /// transport has shut down.
    pub async fn recv_request(&self) -> Option<IncomingRequest> {
        if !self.is_running() {
            return None;
        }
        self.incoming_rx.lock().await.recv().await
    }

    /// Answers a previously received request.
    pub async fn send_response(
        &self,
        channel: ResponseChannel<ReplicationMessage>,
        message: ReplicationMessage,
    ) -> SyncResult<()> {
        self.command(SwarmCommand::SendResponse { channel, message })
            .await
    }

    async fn command(&self, command: SwarmCommand) -> SyncResult<()> {
        let command_tx = self
            .command_tx
            .as_ref()
            .filter(|_| self.is_running())
            .ok_or_else(|| SyncError::Network("transport not running".to_string()))?;

        command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::Network("command channel closed".to_string()))
    }

    fn create_swarm(&self) -> SyncResult<Swarm<ReplicationBehaviour>> {
        let behaviour = ReplicationBehaviour::new(&self.keypair, self.config.request_timeout);

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_quic()
            .with_behaviour(|_| behaviour)
            .map_err(|e| SyncError::Network(format!("failed to create behaviour: {e}")))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(self.config.idle_timeout))
            .build();

        Ok(swarm)
    }

    async fn run_event_loop(
        mut swarm: Swarm<ReplicationBehaviour>,
        mut command_rx: mpsc::Receiver<SwarmCommand>,
        incoming_tx: mpsc::Sender<IncomingRequest>,
        listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
        running: Arc<AtomicBool>,
    ) {
        let mut pending_requests: HashMap<
            OutboundRequestId,
            oneshot::Sender<SyncResult<ReplicationMessage>>,
        > = HashMap::new();

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(ReplicationBehaviourEvent::Identify(
                            libp2p::identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!("Identified peer {peer_id}: {}", info.agent_version);
                            for addr in info.listen_addrs {
                                swarm.add_peer_address(peer_id, addr);
                            }
                        }
                        SwarmEvent::Behaviour(ReplicationBehaviourEvent::Replication(event)) => {
                            match event {
                                request_response::Event::Message { peer, message, .. } => match message {
                                    request_response::Message::Request { request, channel, .. } => {
                                        let incoming = IncomingRequest {
                                            peer,
                                            message: request,
                                            response_channel: channel,
                                        };
                                        if incoming_tx.send(incoming).await.is_err() {
                                            warn!("Failed to hand incoming request to receiver");
                                        }
                                    }
                                    request_response::Message::Response { request_id, response } => {
                                        if let Some(response_tx) = pending_requests.remove(&request_id) {
                                            let _ = response_tx.send(Ok(response));
                                        }
                                    }
                                },
                                request_response::Event::OutboundFailure { request_id, error, .. } => {
                                    if let Some(response_tx) = pending_requests.remove(&request_id) {
                                        let err = match error {
                                            request_response::OutboundFailure::Timeout => SyncError::Timeout,
                                            other => SyncError::Network(format!("outbound request failed: {other}")),
                                        };
                                        let _ = response_tx.send(Err(err));
                                    }
                                }
                                request_response::Event::InboundFailure { error, .. } => {
                                    warn!("Inbound request failed: {error}");
                                }
                                request_response::Event::ResponseSent { .. } => {}
                            }
                        }
                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            info!("Connection established with {peer_id}");
                        }
                        SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                            info!("Connection closed with {peer_id}: {cause:?}");
                        }
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!("Listening on {address}");
                            listen_addrs.write().await.push(address);
                        }
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SwarmCommand::SendRequest { peer, message, response_tx }) => {
                            let request_id = swarm
                                .behaviour_mut()
                                .replication
                                .send_request(&peer, message);
                            pending_requests.insert(request_id, response_tx);
                        }
                        Some(SwarmCommand::SendResponse { channel, message }) => {
                            if swarm
                                .behaviour_mut()
                                .replication
                                .send_response(channel, message)
                                .is_err()
                            {
                                warn!("Failed to send response (channel closed)");
                            }
                        }
                        Some(SwarmCommand::AddAddress { peer, address }) => {
                            swarm.add_peer_address(peer, address);
                        }
                        Some(SwarmCommand::Shutdown) | None => break,
                    }
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        for (_, response_tx) in pending_requests.drain() {
            let _ = response_tx.send(Err(SyncError::ChannelClosed));
        }
        debug!("Swarm event loop exited");
    }
}
