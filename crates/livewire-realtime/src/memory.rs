//! In-process loopback transport.
//!
//! Behaves like a single-client backend: broadcasts are echoed when the
//! channel asked for its own broadcasts, and `track`/`untrack` come back as
//! presence joins/leaves. Failure injection and inspection helpers make it
//! the transport of choice for tests and offline demos.

use std::collections::HashMap;

use async_trait::async_trait;
use livewire_common::ClientId;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::error::TransportError;
use crate::event::BroadcastMessage;
use crate::transport::{
    ChannelOptions, ConnectionStatus, InboundMessage, PeerUpdate, PresenceMessage, Transport,
};

const DEFAULT_BUFFER: usize = 256;

struct OpenChannel {
    sender: mpsc::Sender<InboundMessage>,
    options: ChannelOptions,
}

#[derive(Default)]
struct MemoryState {
    channels: HashMap<String, OpenChannel>,
    opens: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    tracks: HashMap<String, usize>,
    tracked: HashMap<String, Value>,
    sent: Vec<BroadcastMessage>,
    connect_calls: usize,
    fail_connects: usize,
    fail_opens: usize,
}

pub struct MemoryTransport {
    client_id: ClientId,
    buffer: usize,
    status_tx: watch::Sender<ConnectionStatus>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    /// A transport that starts disconnected.
    pub fn new() -> Self {
        Self::with_client_id(ClientId::new())
    }

    pub fn with_client_id(client_id: ClientId) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            client_id,
            buffer: DEFAULT_BUFFER,
            status_tx,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// A transport that is already connected.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.status_tx.send_replace(ConnectionStatus::Connected);
        transport
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    // -- failure injection --------------------------------------------------

    /// Simulate the backend coming and going. Going down closes every
    /// channel's inbound stream.
    pub async fn set_connected(&self, connected: bool) {
        if connected {
            self.status_tx.send_replace(ConnectionStatus::Connected);
        } else {
            self.state.lock().await.channels.clear();
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
        }
    }

    pub async fn fail_next_connects(&self, count: usize) {
        self.state.lock().await.fail_connects = count;
    }

    pub async fn fail_next_opens(&self, count: usize) {
        self.state.lock().await.fail_opens = count;
    }

    /// Push a message into an open channel as if the backend sent it.
    /// Returns `false` when the topic is not open.
    pub async fn inject(&self, topic: &str, message: InboundMessage) -> bool {
        let sender = {
            let state = self.state.lock().await;
            match state.channels.get(topic) {
                Some(channel) => channel.sender.clone(),
                None => return false,
            }
        };
        sender.send(message).await.is_ok()
    }

    // -- inspection ---------------------------------------------------------

    pub async fn is_open(&self, topic: &str) -> bool {
        self.state.lock().await.channels.contains_key(topic)
    }

    pub async fn open_count(&self, topic: &str) -> usize {
        self.state.lock().await.opens.get(topic).copied().unwrap_or(0)
    }

    pub async fn close_count(&self, topic: &str) -> usize {
        self.state.lock().await.closes.get(topic).copied().unwrap_or(0)
    }

    pub async fn track_count(&self, topic: &str) -> usize {
        self.state.lock().await.tracks.get(topic).copied().unwrap_or(0)
    }

    pub async fn tracked(&self, topic: &str) -> Option<Value> {
        self.state.lock().await.tracked.get(topic).cloned()
    }

    pub async fn sent_broadcasts(&self) -> Vec<BroadcastMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn connect_calls(&self) -> usize {
        self.state.lock().await.connect_calls
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        match *self.status_tx.borrow() {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn presence_key(&self, options: &ChannelOptions) -> String {
        options
            .presence_key
            .clone()
            .unwrap_or_else(|| self.client_id.to_string())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.connect_calls += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
            return Err(TransportError::ConnectFailed("injected failure".into()));
        }
        self.status_tx.send_replace(ConnectionStatus::Connected);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    async fn open_channel(
        &self,
        topic: &str,
        options: &ChannelOptions,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::ChannelRejected {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }
        let (sender, receiver) = mpsc::channel(self.buffer);
        state.channels.insert(
            topic.to_string(),
            OpenChannel {
                sender,
                options: options.clone(),
            },
        );
        *state.opens.entry(topic.to_string()).or_default() += 1;
        debug!(topic = %topic, "memory channel opened");
        Ok(receiver)
    }

    async fn close_channel(&self, topic: &str) {
        let mut state = self.state.lock().await;
        state.channels.remove(topic);
        state.tracked.remove(topic);
        *state.closes.entry(topic.to_string()).or_default() += 1;
        debug!(topic = %topic, "memory channel closed");
    }

    async fn track(&self, topic: &str, metadata: Value) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        *state.tracks.entry(topic.to_string()).or_default() += 1;
        state.tracked.insert(topic.to_string(), metadata.clone());
        if let Some(channel) = state.channels.get(topic) {
            let update = PeerUpdate::at(self.presence_key(&channel.options), metadata, Instant::now());
            let _ = channel
                .sender
                .try_send(InboundMessage::Presence(PresenceMessage::Join(update)));
        }
        Ok(())
    }

    async fn untrack(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state.tracked.remove(topic);
        if let Some(channel) = state.channels.get(topic) {
            let leave = PresenceMessage::Leave {
                peer_id: self.presence_key(&channel.options),
                at: Instant::now(),
            };
            let _ = channel.sender.try_send(InboundMessage::Presence(leave));
        }
        Ok(())
    }

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        if let Some(channel) = state.channels.get(&message.topic) {
            if channel.options.receive_own_broadcasts {
                let _ = channel
                    .sender
                    .try_send(InboundMessage::Broadcast(message.clone()));
            }
        }
        state.sent.push(message);
        Ok(())
    }
}
