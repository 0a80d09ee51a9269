//! In-process message channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Message;
use crate::traits::{ChannelError, MessageChannel, OUTBOUND_CAPACITY, OutboundSender};

/// Bridge side of an in-process channel pair.
pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: Option<OutboundSender>,
}

impl MemoryChannel {
    /// Create a channel and the peer handle that drives it.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        Self::with_capacity(OUTBOUND_CAPACITY)
    }

    /// Like [`MemoryChannel::pair`] with room for `capacity` unread outbound messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, MemoryPeer) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));

        let channel = Self {
            inbound,
            outbound: Some(OutboundSender::new(outbound_tx)),
        };

        let peer = MemoryPeer {
            tx: Some(inbound_tx),
            rx: outbound_rx,
        };

        (channel, peer)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn receive(&mut self) -> Result<Message, ChannelError> {
        self.inbound.recv().await.ok_or(ChannelError::Closed)
    }

    fn outbound(&self) -> OutboundSender {
        self.outbound
            .clone()
            .unwrap_or_else(OutboundSender::detached)
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }
}

/// Peer side of an in-process channel pair.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Message>>,
    rx: mpsc::Receiver<Message>,
}

impl MemoryPeer {
    /// Send a message to the bridge.
    ///
    /// # Errors
    /// Returns error if the bridge side is gone or the peer hung up.
    pub fn send(&self, msg: Message) -> Result<(), ChannelError> {
        self.tx
            .as_ref()
            .ok_or(ChannelError::Closed)?
            .send(msg)
            .map_err(|_| ChannelError::Closed)
    }

    /// Receive the next message from the bridge.
    ///
    /// Returns `None` once every bridge-side sender is dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Stop sending; the bridge sees the channel as closed.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}
