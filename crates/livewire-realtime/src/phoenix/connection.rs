//! WebSocket connection to a Phoenix-channels backend.
//!
//! One socket carries every channel. A reader task routes inbound frames to
//! per-topic streams and resolves pending join replies; a heartbeat task
//! keeps the socket alive. When the socket drops, every stream is closed
//! and the status flips to `Disconnected`; reconnecting is left to the
//! caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use livewire_common::ClientId;
use livewire_config::RealtimeConfig;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::handler::{translate, Reply, Routed};
use super::types::{join_payload, PhoenixMessage};
use crate::error::TransportError;
use crate::event::BroadcastMessage;
use crate::transport::{ChannelOptions, ConnectionStatus, InboundMessage, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// Shared State
// ---------------------------------------------------------------------------

struct Shared {
    status_tx: watch::Sender<ConnectionStatus>,
    writer: Mutex<Option<WsSink>>,
    routes: RwLock<HashMap<String, mpsc::Sender<InboundMessage>>>,
    replies: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    next_ref: AtomicU64,
}

impl Shared {
    /// Monotonically increasing ref for outgoing messages.
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    async fn send_frame(&self, message: PhoenixMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(&message)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn forget(&self, topic: &str, msg_ref: &str) {
        self.routes.write().await.remove(topic);
        self.replies.lock().await.remove(msg_ref);
    }

    /// Route one inbound frame. Never waits on a topic's queue: a topic whose
    /// consumer has fallen `channel_buffer` messages behind is left and
    /// handed back to its owner as a channel error, so one slow topic cannot
    /// hold up the others sharing the socket.
    async fn dispatch(self: &Arc<Self>, frame: PhoenixMessage) {
        match translate(&frame, Instant::now()) {
            Routed::Reply { msg_ref, reply } => {
                if let Some(waiter) = self.replies.lock().await.remove(&msg_ref) {
                    let _ = waiter.send(reply);
                }
            }
            Routed::Deliver { topic, messages } => {
                let closing = messages
                    .iter()
                    .any(|m| matches!(m, InboundMessage::ChannelError { .. }));
                let sender = self.routes.read().await.get(&topic).cloned();
                let Some(sender) = sender else {
                    debug!(topic = %topic, "message for unjoined topic dropped");
                    return;
                };
                for message in messages {
                    match sender.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Closed(_)) => break,
                        Err(TrySendError::Full(_)) => {
                            self.drop_lagging(topic, sender).await;
                            return;
                        }
                    }
                }
                if closing {
                    self.routes.write().await.remove(&topic);
                }
            }
            Routed::Ignore => {}
        }
    }

    async fn drop_lagging(self: &Arc<Self>, topic: String, sender: mpsc::Sender<InboundMessage>) {
        warn!(topic = %topic, "consumer fell behind, leaving channel");
        self.routes.write().await.remove(&topic);
        let shared = self.clone();
        tokio::spawn(async move {
            let leave = PhoenixMessage::leave(&topic, shared.next_ref());
            if let Err(e) = shared.send_frame(leave).await {
                debug!(topic = %topic, error = %e, "phx_leave not sent");
            }
            // Queued messages drain first; the error tells the owner to rejoin.
            let _ = sender
                .send(InboundMessage::ChannelError {
                    reason: "consumer lagged".into(),
                })
                .await;
        });
    }

    /// Socket gone: close every stream and fail every pending request.
    async fn on_disconnect(&self) {
        self.writer.lock().await.take();
        self.routes.write().await.clear();
        self.replies.lock().await.clear();
        self.set_status(ConnectionStatus::Disconnected);
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct PhoenixTransport {
    config: RealtimeConfig,
    client_id: ClientId,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PhoenixTransport {
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_client_id(config, ClientId::new())
    }

    pub fn with_client_id(config: RealtimeConfig, client_id: ClientId) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            client_id,
            shared: Arc::new(Shared {
                status_tx,
                writer: Mutex::new(None),
                routes: RwLock::new(HashMap::new()),
                replies: Mutex::new(HashMap::new()),
                next_ref: AtomicU64::new(1),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        match self.status() {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for PhoenixTransport {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for PhoenixTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.status() == ConnectionStatus::Connected {
            return Ok(());
        }
        self.shared.set_status(ConnectionStatus::Connecting);

        let url = self.config.ws_url();
        let timeout = self.config.connect_timeout();
        info!(url = %url.split('?').next().unwrap_or(""), "connecting to realtime backend");

        let ws_stream =
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(&url)).await {
                Ok(Ok((ws_stream, _))) => ws_stream,
                Ok(Err(e)) => {
                    error!(error = %e, "failed to connect to realtime backend");
                    self.shared.set_status(ConnectionStatus::Disconnected);
                    return Err(TransportError::ConnectFailed(e.to_string()));
                }
                Err(_elapsed) => {
                    error!(timeout = ?timeout, "realtime connection timed out");
                    self.shared.set_status(ConnectionStatus::Disconnected);
                    return Err(TransportError::Timeout(timeout));
                }
            };

        let (ws_write, ws_read) = ws_stream.split();
        *self.shared.writer.lock().await = Some(ws_write);
        self.shared.set_status(ConnectionStatus::Connected);
        info!("realtime connected");

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        tasks.push(tokio::spawn(read_loop(ws_read, self.shared.clone())));
        tasks.push(tokio::spawn(heartbeat_loop(
            self.shared.clone(),
            self.config.socket_heartbeat(),
        )));
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    async fn open_channel(
        &self,
        topic: &str,
        options: &ChannelOptions,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::channel(self.config.channel_buffer.max(1));
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg_ref = self.shared.next_ref();
        self.shared
            .replies
            .lock()
            .await
            .insert(msg_ref.clone(), reply_tx);
        // Route before joining: the backend may push presence ahead of the reply.
        self.shared
            .routes
            .write()
            .await
            .insert(topic.to_string(), sender);

        let key = options
            .presence_key
            .clone()
            .unwrap_or_else(|| self.client_id.to_string());
        let payload = join_payload(options, &key, self.config.access_token.as_deref());
        if let Err(e) = self
            .shared
            .send_frame(PhoenixMessage::join(topic, payload, msg_ref.clone()))
            .await
        {
            self.shared.forget(topic, &msg_ref).await;
            return Err(e);
        }

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) if reply.is_ok() => {
                debug!(topic = %topic, "channel joined");
                Ok(receiver)
            }
            Ok(Ok(reply)) => {
                self.shared.forget(topic, &msg_ref).await;
                warn!(topic = %topic, status = %reply.status, "channel join rejected");
                Err(TransportError::ChannelRejected {
                    topic: topic.to_string(),
                    reason: reply.reason(),
                })
            }
            Ok(Err(_)) => {
                self.shared.forget(topic, &msg_ref).await;
                Err(TransportError::Closed)
            }
            Err(_elapsed) => {
                self.shared.forget(topic, &msg_ref).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn close_channel(&self, topic: &str) {
        self.shared.routes.write().await.remove(topic);
        let msg_ref = self.shared.next_ref();
        if let Err(e) = self
            .shared
            .send_frame(PhoenixMessage::leave(topic, msg_ref))
            .await
        {
            debug!(topic = %topic, error = %e, "phx_leave not sent");
        }
    }

    async fn track(&self, topic: &str, metadata: Value) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let msg_ref = self.shared.next_ref();
        self.shared
            .send_frame(PhoenixMessage::track(topic, metadata, msg_ref))
            .await
    }

    async fn untrack(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let msg_ref = self.shared.next_ref();
        self.shared
            .send_frame(PhoenixMessage::untrack(topic, msg_ref))
            .await
    }

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let msg_ref = self.shared.next_ref();
        self.shared
            .send_frame(PhoenixMessage::broadcast(
                &message.topic,
                &message.event_name,
                message.payload,
                msg_ref,
            ))
            .await
    }
}

// ---------------------------------------------------------------------------
// Background Tasks
// ---------------------------------------------------------------------------

async fn read_loop(mut ws_read: WsSource, shared: Arc<Shared>) {
    while let Some(msg_result) = ws_read.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<PhoenixMessage>(text.as_str()) {
                Ok(frame) => shared.dispatch(frame).await,
                Err(_) => debug!(text = %text.as_str(), "unrecognized message from backend"),
            },
            Ok(WsMessage::Close(_)) => {
                info!("realtime backend closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }
    shared.on_disconnect().await;
}

async fn heartbeat_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = shared
            .send_frame(PhoenixMessage::heartbeat(shared.next_ref()))
            .await
        {
            debug!(error = %e, "socket heartbeat stopped");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> PhoenixTransport {
        PhoenixTransport::with_client_id(RealtimeConfig::default(), ClientId::from_string("device-7"))
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let transport = transport();
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.client_id().as_str(), "device-7");
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let transport = transport();
        let err = transport
            .open_channel("room", &ChannelOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(
            transport.track("room", serde_json::json!({})).await,
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            transport
                .send(BroadcastMessage::new("room", "typing", serde_json::json!({})))
                .await,
            Err(TransportError::NotConnected)
        );
        // Closing an unknown channel is a no-op.
        transport.close_channel("room").await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_fails_to_connect() {
        let config = RealtimeConfig {
            url: "ws://127.0.0.1:1/realtime/v1/websocket".into(),
            connect_timeout_secs: 1,
            ..RealtimeConfig::default()
        };
        let transport = PhoenixTransport::new(config);
        let mut status = transport.watch_status();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectFailed(_) | TransportError::Timeout(_)
        ));
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn refs_are_unique() {
        let transport = transport();
        let a = transport.shared.next_ref();
        let b = transport.shared.next_ref();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn dispatch_resolves_pending_reply() {
        let transport = transport();
        let (tx, rx) = oneshot::channel();
        transport.shared.replies.lock().await.insert("9".into(), tx);
        transport
            .shared
            .dispatch(PhoenixMessage {
                topic: "realtime:room".into(),
                event: "phx_reply".into(),
                payload: serde_json::json!({"status": "ok", "response": {}}),
                msg_ref: Some("9".into()),
            })
            .await;
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dispatch_routes_by_topic_and_drops_route_on_close() {
        let transport = transport();
        let (tx, mut rx) = mpsc::channel(8);
        transport.shared.routes.write().await.insert("room".into(), tx);

        transport
            .shared
            .dispatch(PhoenixMessage {
                topic: "realtime:room".into(),
                event: "phx_error".into(),
                payload: serde_json::json!({}),
                msg_ref: None,
            })
            .await;
        assert!(matches!(rx.recv().await, Some(InboundMessage::ChannelError { .. })));
        assert!(transport.shared.routes.read().await.is_empty());
    }

    #[tokio::test]
    async fn lagging_topic_is_left_without_stalling_others() {
        let transport = transport();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        transport.shared.routes.write().await.insert("slow".into(), slow_tx);
        transport.shared.routes.write().await.insert("fast".into(), fast_tx);

        let typing = |topic: &str| PhoenixMessage {
            topic: format!("realtime:{topic}"),
            event: "broadcast".into(),
            payload: serde_json::json!({"type": "broadcast", "event": "typing", "payload": {}}),
            msg_ref: None,
        };
        transport.shared.dispatch(typing("slow")).await;
        transport.shared.dispatch(typing("slow")).await;
        transport.shared.dispatch(typing("fast")).await;

        assert!(matches!(fast_rx.recv().await, Some(InboundMessage::Broadcast(_))));
        assert!(!transport.shared.routes.read().await.contains_key("slow"));
        assert!(matches!(slow_rx.recv().await, Some(InboundMessage::Broadcast(_))));
        assert!(matches!(
            slow_rx.recv().await,
            Some(InboundMessage::ChannelError { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_closes_streams_and_pending_replies() {
        let transport = transport();
        let (tx, mut rx) = mpsc::channel(8);
        let (reply_tx, reply_rx) = oneshot::channel();
        transport.shared.routes.write().await.insert("room".into(), tx);
        transport.shared.replies.lock().await.insert("1".into(), reply_tx);

        transport.shared.on_disconnect().await;
        assert!(rx.recv().await.is_none());
        assert!(reply_rx.await.is_err());
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }
}
