//! Channels that carry replication messages between two peers.
//!
//! [`Channel`] is a closed set of transports behind one contract: an
//! in-process pair for tests and co-located stores, and a libp2p
//! request-response link for real peers.

use crate::error::{SyncError, SyncResult};
use crate::p2p::NetworkChannel;
use crate::protocol::ReplicationMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Capacity of each direction of a local channel.
const LOCAL_CHANNEL_CAPACITY: usize = 64;

/// Send, receive and close replication messages.
#[async_trait]
pub trait ReplicationChannel: Send + Sync {
    /// Sends one message.
    async fn send(&self, message: ReplicationMessage) -> SyncResult<()>;

    /// Waits for the next message.
    async fn receive(&self) -> SyncResult<ReplicationMessage>;

    /// Closes the channel. Later sends and receives fail.
    async fn close(&self);

    /// Returns false once either side has closed.
    fn is_open(&self) -> bool;
}

/// One end of an in-process channel pair.
pub struct LocalChannel {
    tx: Mutex<Option<mpsc::Sender<ReplicationMessage>>>,
    rx: Mutex<mpsc::Receiver<ReplicationMessage>>,
    open: AtomicBool,
}

impl LocalChannel {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(LOCAL_CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(LOCAL_CHANNEL_CAPACITY);
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::Sender<ReplicationMessage>, rx: mpsc::Receiver<ReplicationMessage>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ReplicationChannel for LocalChannel {
    async fn send(&self, message: ReplicationMessage) -> SyncResult<()> {
        let tx = self.tx.lock().await;
        let tx = tx.as_ref().ok_or(SyncError::ChannelClosed)?;
        tx.send(message).await.map_err(|_| {
            self.open.store(false, Ordering::Release);
            SyncError::ChannelClosed
        })
    }

    async fn receive(&self) -> SyncResult<ReplicationMessage> {
        if !self.is_open() {
            return Err(SyncError::ChannelClosed);
        }
        match self.rx.lock().await.recv().await {
            Some(message) => Ok(message),
            None => {
                self.open.store(false, Ordering::Release);
                Err(SyncError::ChannelClosed)
            }
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.tx.lock().await.take();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// A replication channel over one of the supported transports.
pub enum Channel {
    Local(LocalChannel),
    Network(NetworkChannel),
}

impl Channel {
    /// Creates a connected pair of local channels.
    #[must_use]
    pub fn local_pair() -> (Self, Self) {
        let (a, b) = LocalChannel::pair();
        (Self::Local(a), Self::Local(b))
    }
}

#[async_trait]
impl ReplicationChannel for Channel {
    async fn send(&self, message: ReplicationMessage) -> SyncResult<()> {
        match self {
            Self::Local(c) => c.send(message).await,
            Self::Network(c) => c.send(message).await,
        }
    }

    async fn receive(&self) -> SyncResult<ReplicationMessage> {
        match self {
            Self::Local(c) => c.receive().await,
            Self::Network(c) => c.receive().await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Local(c) => c.close().await,
            Self::Network(c) => c.close().await,
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::Local(c) => c.is_open(),
            Self::Network(c) => c.is_open(),
        }
    }
}

impl From<LocalChannel> for Channel {
    fn from(c: LocalChannel) -> Self {
        Self::Local(c)
    }
}

impl From<NetworkChannel> for Channel {
    fn from(c: NetworkChannel) -> Self {
        Self::Network(c)
    }
}
