//! The seam between the coordination core and a realtime backend.
//!
//! One [`Transport`] is one physical connection. Channels are multiplexed
//! onto it by topic; each open channel yields its own inbound stream.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::TransportError;
use crate::event::{BroadcastMessage, ChangeEvent};

/// Physical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// A row-change feed to request when opening a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFeed {
    pub schema: String,
    /// `None` means every table in the schema.
    pub table: Option<String>,
}

impl ChangeFeed {
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: Some(table.into()),
        }
    }

    pub fn schema(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: None,
        }
    }
}

/// Per-channel options, fixed by whoever first subscribes to a topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    /// Key this client's presence is published under. Transports fall back
    /// to their own client id.
    pub presence_key: Option<String>,
    pub change_feeds: Vec<ChangeFeed>,
    /// Echo our own broadcasts back to us.
    pub receive_own_broadcasts: bool,
}

impl ChannelOptions {
    pub fn with_change_feed(mut self, feed: ChangeFeed) -> Self {
        self.change_feeds.push(feed);
        self
    }

    pub fn with_presence_key(mut self, key: impl Into<String>) -> Self {
        self.presence_key = Some(key.into());
        self
    }

    pub fn with_own_broadcasts(mut self) -> Self {
        self.receive_own_broadcasts = true;
        self
    }
}

/// A peer's presence as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerUpdate {
    pub peer_id: String,
    pub metadata: Value,
    pub at: Instant,
}

impl PeerUpdate {
    pub fn new(peer_id: impl Into<String>, metadata: Value) -> Self {
        Self::at(peer_id, metadata, Instant::now())
    }

    pub fn at(peer_id: impl Into<String>, metadata: Value, at: Instant) -> Self {
        Self {
            peer_id: peer_id.into(),
            metadata,
            at,
        }
    }
}

/// Presence traffic on one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceMessage {
    /// Full authoritative state.
    Sync(Vec<PeerUpdate>),
    Join(PeerUpdate),
    Heartbeat(PeerUpdate),
    Leave { peer_id: String, at: Instant },
}

/// Everything an open channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Change(ChangeEvent),
    Broadcast(BroadcastMessage),
    Presence(PresenceMessage),
    /// The backend dropped or errored the channel; it must be rejoined.
    ChannelError { reason: String },
}

/// A realtime backend connection.
///
/// Implementations never reconnect on their own: when the connection drops
/// they report [`ConnectionStatus::Disconnected`], close every inbound
/// stream, and wait for [`connect`](Transport::connect).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;

    fn status(&self) -> ConnectionStatus;

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Join `topic` and return its inbound stream once the backend accepts.
    async fn open_channel(
        &self,
        topic: &str,
        options: &ChannelOptions,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError>;

    /// Leave `topic`. Best effort; unknown topics are ignored.
    async fn close_channel(&self, topic: &str);

    /// Publish (or refresh) this client's presence on `topic`.
    async fn track(&self, topic: &str, metadata: Value) -> Result<(), TransportError>;

    async fn untrack(&self, topic: &str) -> Result<(), TransportError>;

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError>;
}
