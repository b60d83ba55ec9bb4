use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::warn;

use super::channel::{ChannelHistory, ChannelId, ChannelStatus};
use super::RegistryInner;
use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{BroadcastMessage, ChangeEvent, ChangeFilter, ChannelEvent};
use crate::stream::ListenerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl SubscriberId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// One subscriber's stake in a shared channel.
///
/// Listeners registered through the handle are removed when it is released.
/// Dropping the handle without [`unsubscribe`](Self::unsubscribe) releases
/// it in the background.
pub struct SubscriberHandle {
    id: SubscriberId,
    topic: String,
    channel_id: ChannelId,
    registry: Weak<RegistryInner>,
    status_rx: watch::Receiver<ChannelStatus>,
    history: Arc<Mutex<ChannelHistory>>,
    released: bool,
}

impl SubscriberHandle {
    pub(crate) fn new(
        id: SubscriberId,
        topic: &str,
        channel_id: ChannelId,
        registry: Weak<RegistryInner>,
        status_rx: watch::Receiver<ChannelStatus>,
        history: Arc<Mutex<ChannelHistory>>,
    ) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            channel_id,
            registry,
            status_rx,
            history,
            released: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub async fn on_change<F>(&self, filter: ChangeFilter, callback: F) -> RealtimeResult<ListenerId>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let registry = self.registry()?;
        Ok(registry
            .stream
            .on_change_owned(&self.topic, self.id, filter, Arc::new(callback))
            .await)
    }

    pub async fn on_broadcast<F>(&self, event_name: &str, callback: F) -> RealtimeResult<ListenerId>
    where
        F: Fn(&BroadcastMessage) + Send + Sync + 'static,
    {
        let registry = self.registry()?;
        Ok(registry
            .stream
            .on_broadcast_owned(&self.topic, self.id, event_name, Arc::new(callback))
            .await)
    }

    /// Fire-and-forget broadcast on this handle's topic.
    pub async fn broadcast(&self, event_name: &str, payload: Value) {
        if let Ok(registry) = self.registry() {
            registry.stream.broadcast(&self.topic, event_name, payload).await;
        }
    }

    pub async fn track(&self, metadata: Value) -> RealtimeResult<()> {
        self.registry()?.presence.track(&self.topic, metadata).await
    }

    /// Up to `limit` most recent events on this channel, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<ChannelEvent> {
        self.history.lock().await.recent(limit)
    }

    /// Release this subscriber. Returns `false` if the registry was already
    /// gone or had dropped the channel.
    pub async fn unsubscribe(mut self) -> bool {
        self.released = true;
        match self.registry.upgrade() {
            Some(registry) => registry.release(self.id, &self.topic, self.channel_id).await,
            None => false,
        }
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    fn registry(&self) -> RealtimeResult<Arc<RegistryInner>> {
        self.registry.upgrade().ok_or(RealtimeError::RegistryClosed)
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("channel_id", &self.channel_id)
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let (id, channel_id) = (self.id, self.channel_id);
        let topic = std::mem::take(&mut self.topic);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    registry.release(id, &topic, channel_id).await;
                });
            }
            Err(_) => {
                warn!(topic = %topic, "subscriber handle dropped outside a runtime, not released");
            }
        }
    }
}
