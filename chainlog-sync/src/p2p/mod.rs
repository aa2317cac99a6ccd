//! libp2p transport for replication.
//!
//! Peers talk over QUIC; each replication message is one request-response
//! round trip on the `/chainlog/replication/1.0.0` protocol.

mod behaviour;
mod channel;
pub mod codec;
mod transport;

pub use behaviour::{REPLICATION_PROTOCOL, extract_peer_id};
pub use channel::NetworkChannel;
pub use codec::ReplicationCodec;
pub use libp2p::Multiaddr;
pub use libp2p::identity::Keypair;
pub use transport::{IncomingRequest, P2pConfig, P2pTransport};
