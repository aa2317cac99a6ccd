//! A [`ReplicationChannel`] over libp2p request-response.

use crate::error::{SyncError, SyncResult};
use crate::p2p::P2pTransport;
use crate::protocol::ReplicationMessage;
use crate::transport::ReplicationChannel;
use async_trait::async_trait;
use libp2p::PeerId as Libp2pPeerId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Requester side of a network session.
///
/// Every `send` is one request; its response is parked until the next
/// `receive`. At most one response is parked, so one nobody read (such as
/// the answer to an `Error`) is replaced by the next send.
pub struct NetworkChannel {
    transport: Arc<P2pTransport>,
    remote: Libp2pPeerId,
    pending: Mutex<Option<ReplicationMessage>>,
    open: AtomicBool,
}

impl NetworkChannel {
    pub(crate) fn new(transport: Arc<P2pTransport>, remote: Libp2pPeerId) -> Self {
        Self {
            transport,
            remote,
            pending: Mutex::new(None),
            open: AtomicBool::new(true),
        }
    }

    /// The libp2p identity of the remote peer.
    pub fn remote(&self) -> Libp2pPeerId {
        self.remote
    }
}

#[async_trait]
impl ReplicationChannel for NetworkChannel {
    async fn send(&self, message: ReplicationMessage) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::ChannelClosed);
        }
        let mut pending = self.pending.lock().await;
        *pending = None;
        *pending = Some(self.transport.send_request(self.remote, message).await?);
        Ok(())
    }

    async fn receive(&self) -> SyncResult<ReplicationMessage> {
        if !self.is_open() {
            return Err(SyncError::ChannelClosed);
        }
        self.pending
            .lock()
            .await
            .take()
            .ok_or_else(|| SyncError::Protocol("no request awaiting a response".into()))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.pending.lock().await.take();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.transport.is_running()
    }
}
