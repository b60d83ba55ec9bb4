//! Typed per-topic event delivery.
//!
//! Listeners are synchronous callbacks keyed by topic. Inbound events are
//! dispatched in arrival order; outbound broadcasts are fire-and-forget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::event::{BroadcastMessage, ChangeEvent, ChangeFilter};
use crate::registry::SubscriberId;
use crate::transport::Transport;

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type BroadcastCallback = Arc<dyn Fn(&BroadcastMessage) + Send + Sync>;

/// Event name that matches every broadcast on a topic.
pub const ANY_EVENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

enum ListenerKind {
    Change {
        filter: ChangeFilter,
        callback: ChangeCallback,
    },
    Broadcast {
        event_name: String,
        callback: BroadcastCallback,
    },
}

struct Listener {
    id: ListenerId,
    owner: Option<SubscriberId>,
    kind: ListenerKind,
}

struct StreamInner {
    transport: Arc<dyn Transport>,
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
}

/// Cheap to clone; clones share listeners.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

impl EventStream {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                transport,
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a row-change listener on `topic`.
    pub async fn on_change<F>(&self, topic: &str, filter: ChangeFilter, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add(
            topic,
            None,
            ListenerKind::Change {
                filter,
                callback: Arc::new(callback),
            },
        )
        .await
    }

    /// Register a broadcast listener for `event_name` (or [`ANY_EVENT`]).
    pub async fn on_broadcast<F>(&self, topic: &str, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&BroadcastMessage) + Send + Sync + 'static,
    {
        self.add(
            topic,
            None,
            ListenerKind::Broadcast {
                event_name: event_name.to_string(),
                callback: Arc::new(callback),
            },
        )
        .await
    }

    pub(crate) async fn on_change_owned(
        &self,
        topic: &str,
        owner: SubscriberId,
        filter: ChangeFilter,
        callback: ChangeCallback,
    ) -> ListenerId {
        self.add(topic, Some(owner), ListenerKind::Change { filter, callback })
            .await
    }

    pub(crate) async fn on_broadcast_owned(
        &self,
        topic: &str,
        owner: SubscriberId,
        event_name: &str,
        callback: BroadcastCallback,
    ) -> ListenerId {
        self.add(
            topic,
            Some(owner),
            ListenerKind::Broadcast {
                event_name: event_name.to_string(),
                callback,
            },
        )
        .await
    }

    async fn add(&self, topic: &str, owner: Option<SubscriberId>, kind: ListenerKind) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(Listener { id, owner, kind });
        id
    }

    /// Remove one listener. Returns whether it existed.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write().await;
        let mut removed = false;
        listeners.retain(|_, list| {
            let before = list.len();
            list.retain(|l| l.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Remove every listener registered through `owner`'s handle.
    pub(crate) async fn remove_owned(&self, topic: &str, owner: SubscriberId) -> usize {
        let mut listeners = self.inner.listeners.write().await;
        let Some(list) = listeners.get_mut(topic) else {
            return 0;
        };
        let before = list.len();
        list.retain(|l| l.owner != Some(owner));
        let removed = before - list.len();
        if list.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    /// Remove every listener on `topic`.
    pub async fn remove_topic(&self, topic: &str) -> usize {
        self.inner
            .listeners
            .write()
            .await
            .remove(topic)
            .map_or(0, |list| list.len())
    }

    pub async fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .listeners
            .read()
            .await
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Send an ephemeral message to every subscriber of `topic`.
    ///
    /// Delivery is best effort: transport failures are logged and dropped.
    pub async fn broadcast(&self, topic: &str, event_name: &str, payload: Value) {
        let message = BroadcastMessage::new(topic, event_name, payload);
        if let Err(e) = self.inner.transport.send(message).await {
            warn!(topic = %topic, event = %event_name, error = %e, "broadcast dropped");
        }
    }

    /// Deliver to matching change listeners. Returns how many were invoked.
    pub(crate) async fn dispatch_change(&self, event: &ChangeEvent) -> usize {
        let callbacks: Vec<ChangeCallback> = {
            let listeners = self.inner.listeners.read().await;
            listeners
                .get(&event.topic)
                .into_iter()
                .flatten()
                .filter_map(|l| match &l.kind {
                    ListenerKind::Change { filter, callback } if filter.matches(event) => {
                        Some(callback.clone())
                    }
                    _ => None,
                })
                .collect()
        };
        for callback in &callbacks {
            callback(event);
        }
        debug!(
            topic = %event.topic,
            table = %event.table,
            op = event.operation.as_str(),
            listeners = callbacks.len(),
            "change dispatched"
        );
        callbacks.len()
    }

    /// Deliver to matching broadcast listeners. Returns how many were invoked.
    pub(crate) async fn dispatch_broadcast(&self, message: &BroadcastMessage) -> usize {
        let callbacks: Vec<BroadcastCallback> = {
            let listeners = self.inner.listeners.read().await;
            listeners
                .get(&message.topic)
                .into_iter()
                .flatten()
                .filter_map(|l| match &l.kind {
                    ListenerKind::Broadcast {
                        event_name,
                        callback,
                    } if event_name == ANY_EVENT || *event_name == message.event_name => {
                        Some(callback.clone())
                    }
                    _ => None,
                })
                .collect()
        };
        for callback in &callbacks {
            callback(message);
        }
        callbacks.len()
    }
}
