//! # Channel Registry
//!
//! Maps topic names to channels on the shared transport. Subscriptions are
//! ref-counted: the first subscriber to a topic opens the channel, the last
//! one to leave closes it, and everyone in between shares it.
//!
//! All bookkeeping for a topic happens under one registry lock, so concurrent
//! subscribe/unsubscribe calls never observe a half-updated count. The only
//! work done outside the lock is the transport open itself.

mod channel;
mod handle;


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use livewire_config::LivewireConfig;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use channel::{ChannelHistory, ChannelId, ChannelState, ChannelStatus};
pub use handle::{SubscriberHandle, SubscriberId};

use channel::ChannelEntry;

use crate::error::{RealtimeError, RealtimeResult, TransportError};
use crate::event::ChannelEvent;
use crate::presence::PresenceTracker;
use crate::stream::EventStream;
use crate::transport::{ChannelOptions, InboundMessage, Transport};

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) stream: EventStream,
    pub(crate) presence: Arc<PresenceTracker>,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    history_capacity: usize,
    next_channel_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    /// Signalled when a channel needs a rejoin outside a connection drop.
    pub(crate) resubscribe_needed: Notify,
    closed: AtomicBool,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<dyn Transport>, config: &LivewireConfig) -> Self {
        let stream = EventStream::new(transport.clone());
        let presence = Arc::new(PresenceTracker::new(transport.clone(), &config.presence));
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                stream,
                presence,
                channels: Mutex::new(HashMap::new()),
                history_capacity: config.realtime.history_capacity,
                next_channel_id: AtomicU64::new(1),
                next_subscriber_id: AtomicU64::new(1),
                resubscribe_needed: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn stream(&self) -> &EventStream {
        &self.inner.stream
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.inner.presence
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Subscribe to `topic` with default channel options.
    pub async fn subscribe(&self, topic: &str) -> RealtimeResult<SubscriberHandle> {
        self.subscribe_with(topic, ChannelOptions::default()).await
    }

    /// Subscribe to `topic`. `options` only take effect when this call opens
    /// the channel; later subscribers share whatever the first one chose.
    ///
    /// When the first open fails, every subscriber waiting on it gets the
    /// transport error and the channel is left to the supervisor. Subscribing
    /// to a channel that is already reconnecting succeeds immediately.
    pub async fn subscribe_with(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> RealtimeResult<SubscriberHandle> {
        self.inner.subscribe(topic, options).await
    }

    /// Publish this client's presence on a subscribed topic.
    pub async fn track(&self, topic: &str, metadata: Value) -> RealtimeResult<()> {
        self.inner.presence.track(topic, metadata).await
    }

    pub async fn untrack(&self, topic: &str) -> bool {
        self.inner.presence.untrack(topic).await
    }

    pub async fn state(&self, topic: &str) -> Option<ChannelState> {
        self.inner.channels.lock().await.get(topic).map(|e| e.state)
    }

    pub async fn ref_count(&self, topic: &str) -> usize {
        self.inner
            .channels
            .lock()
            .await
            .get(topic)
            .map_or(0, ChannelEntry::ref_count)
    }

    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.channels.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.channels.lock().await.len()
    }

    /// Close every channel and refuse new subscriptions.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    pub(crate) fn inner(&self) -> &Arc<RegistryInner> {
        &self.inner
    }
}

fn validate_topic(topic: &str) -> RealtimeResult<()> {
    if topic.is_empty() || topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RealtimeError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

impl RegistryInner {
    async fn subscribe(
        self: &Arc<Self>,
        topic: &str,
        options: ChannelOptions,
    ) -> RealtimeResult<SubscriberHandle> {
        validate_topic(topic)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(RealtimeError::RegistryClosed);
        }
        let subscriber = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));

        let (channel_id, opener, waits, history, status_rx) = {
            let mut channels = self.channels.lock().await;
            match channels.get_mut(topic) {
                Some(entry) => {
                    entry.subscribers.insert(subscriber);
                    let waits = entry.state == ChannelState::Subscribing;
                    if waits {
                        entry.pending.insert(subscriber);
                    }
                    debug!(topic = %topic, refs = entry.ref_count(), "subscriber attached");
                    (
                        entry.id,
                        false,
                        waits,
                        entry.history.clone(),
                        entry.status_tx.subscribe(),
                    )
                }
                None => {
                    let id = ChannelId(self.next_channel_id.fetch_add(1, Ordering::Relaxed));
                    let mut entry = ChannelEntry::new(id, topic, options, self.history_capacity);
                    entry.subscribers.insert(subscriber);
                    entry.pending.insert(subscriber);
                    entry.transition(ChannelState::Subscribing);
                    entry.publish(ChannelStatus::Subscribing);
                    let attached = (id, true, true, entry.history.clone(), entry.status_tx.subscribe());
                    self.presence.open_topic(topic).await;
                    channels.insert(topic.to_string(), entry);
                    attached
                }
            }
        };

        let mut handle = SubscriberHandle::new(
            subscriber,
            topic,
            channel_id,
            Arc::downgrade(self),
            status_rx,
            history,
        );

        if opener {
            // Spawned so a cancelled subscriber cannot strand the channel in
            // `Subscribing`.
            tokio::spawn(self.clone().open(topic.to_string(), channel_id));
        }
        if !waits {
            return Ok(handle);
        }

        let mut status_rx = handle.watch_status();
        let _ = status_rx
            .wait_for(|s| !matches!(s, ChannelStatus::Subscribing))
            .await;

        let channels = self.channels.lock().await;
        match channels.get(topic).filter(|e| e.id == channel_id) {
            Some(entry) if entry.subscribers.contains(&subscriber) => Ok(handle),
            Some(entry) => {
                handle.mark_released();
                Err(entry.last_error.clone().unwrap_or(TransportError::NotConnected).into())
            }
            None => {
                handle.mark_released();
                Err(TransportError::Closed.into())
            }
        }
    }

    /// First open of a channel. Settles every pending subscriber.
    async fn open(self: Arc<Self>, topic: String, channel_id: ChannelId) {
        let options = {
            let channels = self.channels.lock().await;
            match channels.get(&topic).filter(|e| e.id == channel_id) {
                Some(entry) => entry.options.clone(),
                None => return,
            }
        };

        let result = self.transport.open_channel(&topic, &options).await;

        let mut channels = self.channels.lock().await;
        let Some(entry) = channels.get_mut(&topic).filter(|e| e.id == channel_id) else {
            if result.is_ok() {
                self.transport.close_channel(&topic).await;
            }
            return;
        };

        match result {
            Ok(inbound) => {
                entry.replace_pump(self.spawn_pump(&topic, channel_id, entry.history.clone(), inbound));
                entry.pending.clear();
                entry.last_error = None;
                entry.transition(ChannelState::Subscribed);
                entry.publish(ChannelStatus::Subscribed);
                info!(topic = %topic, refs = entry.ref_count(), "channel subscribed");

                if entry.ref_count() == 0 {
                    if let Some(entry) = channels.remove(&topic) {
                        self.teardown(entry).await;
                    }
                }
            }
            Err(e) => {
                let detached: Vec<SubscriberId> = entry.pending.drain().collect();
                for subscriber in &detached {
                    entry.subscribers.remove(subscriber);
                }
                entry.pending_resubscribe = true;
                entry.last_error = Some(e.clone());
                entry.transition(ChannelState::Reconnecting);
                entry.publish(ChannelStatus::Reconnecting {
                    last_error: Some(e.clone()),
                });
                warn!(topic = %topic, error = %e, detached = detached.len(), "channel open failed");
                drop(channels);
                self.resubscribe_needed.notify_one();
            }
        }
    }

    /// Detach one subscriber; closes the channel when it was the last.
    pub(crate) async fn release(&self, subscriber: SubscriberId, topic: &str, channel_id: ChannelId) -> bool {
        let mut channels = self.channels.lock().await;
        let Some(entry) = channels.get_mut(topic).filter(|e| e.id == channel_id) else {
            return false;
        };
        if !entry.subscribers.remove(&subscriber) {
            return false;
        }
        entry.pending.remove(&subscriber);
        let remaining = entry.ref_count();
        let idle = remaining == 0
            && !entry.pending_resubscribe
            && entry.state != ChannelState::Subscribing;

        let listeners = self.stream.remove_owned(topic, subscriber).await;
        debug!(topic = %topic, refs = remaining, listeners, "subscriber detached");

        if idle {
            if let Some(entry) = channels.remove(topic) {
                self.teardown(entry).await;
            }
        } else if remaining == 0 {
            // The close itself waits for the pending open or rejoin.
            self.stream.remove_topic(topic).await;
            self.presence.stop_local(topic).await;
            debug!(topic = %topic, "channel idle, close deferred");
        }
        true
    }

    /// Close a channel that has already been removed from the map. Called
    /// with the registry lock held so a concurrent subscribe for the same
    /// topic waits for the close to finish.
    async fn teardown(&self, mut entry: ChannelEntry) {
        entry.transition(ChannelState::Unsubscribing);
        entry.stop_pump();
        self.stream.remove_topic(&entry.topic).await;
        self.presence.discard(&entry.topic).await;
        self.transport.close_channel(&entry.topic).await;
        entry.transition(ChannelState::Closed);
        entry.publish(ChannelStatus::Closed);
        info!(topic = %entry.topic, "channel closed");
    }

    fn spawn_pump(
        self: &Arc<Self>,
        topic: &str,
        channel_id: ChannelId,
        history: Arc<Mutex<ChannelHistory>>,
        mut inbound: mpsc::Receiver<InboundMessage>,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let stream = self.stream.clone();
        let presence = self.presence.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    InboundMessage::Change(mut event) => {
                        event.topic.clone_from(&topic);
                        history.lock().await.push(ChannelEvent::Change(event.clone()));
                        stream.dispatch_change(&event).await;
                    }
                    InboundMessage::Broadcast(mut message) => {
                        message.topic.clone_from(&topic);
                        history.lock().await.push(ChannelEvent::Broadcast(message.clone()));
                        stream.dispatch_broadcast(&message).await;
                    }
                    InboundMessage::Presence(update) => presence.apply(&topic, update).await,
                    InboundMessage::ChannelError { reason } => {
                        warn!(topic = %topic, reason = %reason, "channel error from transport");
                        if let Some(registry) = registry.upgrade() {
                            let error = TransportError::ChannelRejected {
                                topic: topic.clone(),
                                reason,
                            };
                            registry.channel_failed(&topic, channel_id, error).await;
                        }
                        break;
                    }
                }
            }
            debug!(topic = %topic, "inbound stream ended");
        })
    }

    /// A live channel was dropped by the backend while the connection stayed up.
    async fn channel_failed(&self, topic: &str, channel_id: ChannelId, error: TransportError) {
        {
            let mut channels = self.channels.lock().await;
            let Some(entry) = channels.get_mut(topic).filter(|e| e.id == channel_id) else {
                return;
            };
            if entry.state != ChannelState::Subscribed {
                return;
            }
            // Detach rather than abort: this runs on the pump itself.
            entry.pump.take();
            entry.pending_resubscribe = true;
            entry.last_error = Some(error.clone());
            entry.transition(ChannelState::Reconnecting);
            entry.publish(ChannelStatus::Reconnecting {
                last_error: Some(error),
            });
        }
        self.resubscribe_needed.notify_one();
    }

    // -- supervisor hooks ---------------------------------------------------

    /// Flag every live or reconnecting channel for rejoin.
    pub(crate) async fn mark_reconnecting(&self, error: Option<TransportError>) -> usize {
        let mut channels = self.channels.lock().await;
        let mut marked = 0;
        for entry in channels.values_mut() {
            if !matches!(entry.state, ChannelState::Subscribed | ChannelState::Reconnecting) {
                continue;
            }
            entry.stop_pump();
            entry.pending_resubscribe = true;
            if error.is_some() {
                entry.last_error.clone_from(&error);
            }
            entry.transition(ChannelState::Reconnecting);
            entry.publish(ChannelStatus::Reconnecting {
                last_error: entry.last_error.clone(),
            });
            marked += 1;
        }
        marked
    }

    /// Flag live channels whose inbound stream has ended, which happens
    /// when the connection bounced faster than its status was observed.
    pub(crate) async fn mark_dead_channels(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let mut marked = 0;
        for entry in channels.values_mut() {
            let dead = entry.pump.as_ref().map_or(true, JoinHandle::is_finished);
            if entry.state != ChannelState::Subscribed || !dead {
                continue;
            }
            entry.pump = None;
            entry.pending_resubscribe = true;
            entry.transition(ChannelState::Reconnecting);
            entry.publish(ChannelStatus::Reconnecting { last_error: None });
            marked += 1;
        }
        marked
    }

    pub(crate) async fn has_pending(&self) -> bool {
        self.channels
            .lock()
            .await
            .values()
            .any(|e| e.pending_resubscribe)
    }

    /// Rejoin every channel flagged for it. Orphans (no subscribers left)
    /// are closed instead. Live presence is re-published after each rejoin.
    ///
    /// Returns the number of channels that failed to rejoin.
    pub(crate) async fn resubscribe_pending(self: &Arc<Self>) -> usize {
        let targets: Vec<(String, ChannelId, ChannelOptions)> = {
            let channels = self.channels.lock().await;
            channels
                .values()
                .filter(|e| e.pending_resubscribe && e.state == ChannelState::Reconnecting)
                .map(|e| (e.topic.clone(), e.id, e.options.clone()))
                .collect()
        };

        let mut failures = 0;
        for (topic, channel_id, options) in targets {
            {
                let mut channels = self.channels.lock().await;
                match channels.get(&topic) {
                    Some(e) if e.id == channel_id && e.ref_count() == 0 => {
                        if let Some(entry) = channels.remove(&topic) {
                            debug!(topic = %topic, "closing orphaned channel");
                            self.teardown(entry).await;
                        }
                        continue;
                    }
                    Some(e) if e.id == channel_id => {}
                    _ => continue,
                }
            }

            // The backend re-sends full presence after a join; start clean.
            let retrack = self.presence.reset_epoch(&topic).await;
            let result = self.transport.open_channel(&topic, &options).await;

            let mut channels = self.channels.lock().await;
            let Some(entry) = channels.get_mut(&topic).filter(|e| e.id == channel_id) else {
                if result.is_ok() {
                    self.transport.close_channel(&topic).await;
                }
                continue;
            };

            match result {
                Ok(inbound) => {
                    entry.replace_pump(self.spawn_pump(&topic, channel_id, entry.history.clone(), inbound));
                    entry.pending_resubscribe = false;
                    entry.last_error = None;
                    entry.transition(ChannelState::Subscribed);
                    entry.publish(ChannelStatus::Subscribed);
                    info!(topic = %topic, refs = entry.ref_count(), "channel resubscribed");

                    if entry.ref_count() == 0 {
                        if let Some(entry) = channels.remove(&topic) {
                            self.teardown(entry).await;
                        }
                        continue;
                    }
                    drop(channels);

                    if let Some(metadata) = retrack {
                        if let Err(e) = self.transport.track(&topic, metadata).await {
                            warn!(topic = %topic, error = %e, "presence re-track failed");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(topic = %topic, error = %e, "channel rejoin failed");
                    entry.last_error = Some(e.clone());
                    entry.publish(ChannelStatus::Reconnecting {
                        last_error: Some(e),
                    });
                }
            }
        }
        failures
    }

    /// Reconnection gave up: tell subscribers, keep their registrations.
    /// Channels nobody is subscribed to any more are closed instead.
    pub(crate) async fn mark_disconnected(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let orphans: Vec<String> = channels
            .values()
            .filter(|e| e.pending_resubscribe && e.ref_count() == 0)
            .map(|e| e.topic.clone())
            .collect();
        for topic in orphans {
            if let Some(entry) = channels.remove(&topic) {
                debug!(topic = %topic, "closing orphaned channel");
                self.teardown(entry).await;
            }
        }

        let mut marked = 0;
        for entry in channels.values().filter(|e| e.pending_resubscribe) {
            entry.publish(ChannelStatus::Disconnected);
            marked += 1;
        }
        marked
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut channels = self.channels.lock().await;
        let entries: Vec<ChannelEntry> = channels.drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            self.teardown(entry).await;
        }
        info!(channels = count, "registry shut down");
    }
}
