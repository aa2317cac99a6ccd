//! Network behaviour for chainlog replication.

use crate::p2p::codec::ReplicationCodec;
use libp2p::{
    Multiaddr, identify,
    multiaddr::Protocol,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
};
use std::iter;
use std::time::Duration;

/// The replication protocol identifier.
pub const REPLICATION_PROTOCOL: &str = "/chainlog/replication/1.0.0";

/// Combined network behaviour.
#[derive(NetworkBehaviour)]
pub struct ReplicationBehaviour {
    /// Identify protocol so peers learn each other's listen addresses.
    pub identify: identify::Behaviour,
    /// Request-response for replication messages.
    pub replication: request_response::Behaviour<ReplicationCodec>,
}

impl ReplicationBehaviour {
    pub fn new(keypair: &libp2p::identity::Keypair, request_timeout: Duration) -> Self {
        let identify = identify::Behaviour::new(
            identify::Config::new(REPLICATION_PROTOCOL.to_string(), keypair.public())
                .with_agent_version(format!("chainlog/{}", env!("CARGO_PKG_VERSION"))),
        );

        let replication = request_response::Behaviour::new(
            iter::once((REPLICATION_PROTOCOL, ProtocolSupport::Full)),
            request_response::Config::default().with_request_timeout(request_timeout),
        );

        Self {
            identify,
            replication,
        }
    }
}

/// Extract the PeerId from a multiaddr like /ip4/.../p2p/12D3KooW...
pub fn extract_peer_id(addr: &Multiaddr) -> Option<libp2p::PeerId> {
    addr.iter().find_map(|proto| match proto {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

/// Remove the /p2p/... suffix from a multiaddr.
pub fn remove_peer_id_suffix(addr: &Multiaddr) -> Multiaddr {
    addr.iter()
        .filter(|proto| !matches!(proto, Protocol::P2p(_)))
        .collect()
}
