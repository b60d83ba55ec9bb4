use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use livewire_config::PresenceConfig;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatTask;
use super::state::{PresenceEntry, PresenceState};
use crate::error::{RealtimeError, RealtimeResult};
use crate::transport::{PresenceMessage, Transport};

struct LocalPresence {
    metadata: Value,
    heartbeat: HeartbeatTask,
}

struct TopicPresence {
    state: PresenceState,
    local: Option<LocalPresence>,
    /// Bumped whenever the merged view changes.
    version: watch::Sender<u64>,
}

impl TopicPresence {
    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Presence for every live channel.
///
/// A topic is known to the tracker from the moment its channel is created
/// by the registry until the channel is torn down.
pub struct PresenceTracker {
    transport: Arc<dyn Transport>,
    heartbeat_interval: Duration,
    stale_after: Duration,
    topics: RwLock<HashMap<String, TopicPresence>>,
}

impl PresenceTracker {
    pub fn new(transport: Arc<dyn Transport>, config: &PresenceConfig) -> Self {
        Self {
            transport,
            heartbeat_interval: config.heartbeat_interval(),
            stale_after: config.stale_after(),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Publish this client's presence on `topic` and keep it alive with a
    /// heartbeat. Tracking again replaces the metadata and restarts the
    /// heartbeat.
    ///
    /// A failed initial publish is returned but tracking stays in place:
    /// the heartbeat and the next resubscription will publish again.
    pub async fn track(&self, topic: &str, metadata: Value) -> RealtimeResult<()> {
        {
            let mut topics = self.topics.write().await;
            let presence = topics
                .get_mut(topic)
                .ok_or_else(|| RealtimeError::NotSubscribed(topic.to_string()))?;
            let heartbeat = HeartbeatTask::spawn(
                self.transport.clone(),
                topic.to_string(),
                metadata.clone(),
                self.heartbeat_interval,
            );
            if let Some(mut previous) = presence.local.replace(LocalPresence {
                metadata: metadata.clone(),
                heartbeat,
            }) {
                previous.heartbeat.cancel();
            }
        }
        info!(topic = %topic, "presence tracked");
        self.transport.track(topic, metadata).await?;
        Ok(())
    }

    /// Stop publishing presence on `topic`. Returns whether it was tracked.
    pub async fn untrack(&self, topic: &str) -> bool {
        let was_tracked = {
            let mut topics = self.topics.write().await;
            match topics.get_mut(topic).and_then(|p| p.local.take()) {
                Some(mut local) => {
                    local.heartbeat.cancel();
                    true
                }
                None => false,
            }
        };
        if was_tracked {
            if let Err(e) = self.transport.untrack(topic).await {
                warn!(topic = %topic, error = %e, "presence untrack failed");
            }
            info!(topic = %topic, "presence untracked");
        }
        was_tracked
    }

    /// Non-stale peers on `topic`, sorted by peer id. Empty for unknown topics.
    pub async fn peers(&self, topic: &str) -> Vec<PresenceEntry> {
        let now = Instant::now();
        let mut topics = self.topics.write().await;
        topics
            .get_mut(topic)
            .map(|p| p.state.peers(now))
            .unwrap_or_default()
    }

    /// Change notifications for `topic`'s merged view.
    pub async fn watch_version(&self, topic: &str) -> Option<watch::Receiver<u64>> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|p| p.version.subscribe())
    }

    pub async fn tracked_metadata(&self, topic: &str) -> Option<Value> {
        self.topics
            .read()
            .await
            .get(topic)
            .and_then(|p| p.local.as_ref())
            .map(|l| l.metadata.clone())
    }

    pub async fn heartbeat_active(&self, topic: &str) -> bool {
        self.topics
            .read()
            .await
            .get(topic)
            .and_then(|p| p.local.as_ref())
            .is_some_and(|l| l.heartbeat.is_running())
    }

    /// Merge inbound presence for `topic`. Unknown topics are ignored.
    pub(crate) async fn apply(&self, topic: &str, message: PresenceMessage) {
        let mut topics = self.topics.write().await;
        let Some(presence) = topics.get_mut(topic) else {
            debug!(topic = %topic, "presence for unknown topic dropped");
            return;
        };
        if presence.state.apply(message) {
            presence.bump();
        }
    }

    pub(crate) async fn open_topic(&self, topic: &str) {
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| TopicPresence {
                state: PresenceState::new(self.stale_after),
                local: None,
                version: watch::channel(0).0,
            });
    }

    /// Forget the merged view ahead of a rejoin. Returns this client's
    /// metadata if it is tracking, so the caller can publish it again.
    pub(crate) async fn reset_epoch(&self, topic: &str) -> Option<Value> {
        let mut topics = self.topics.write().await;
        let presence = topics.get_mut(topic)?;
        presence.state.clear();
        presence.bump();
        presence.local.as_ref().map(|l| l.metadata.clone())
    }

    /// Stop this client's heartbeat on `topic` without touching the merged
    /// view. Nothing is sent: the channel is about to close.
    pub(crate) async fn stop_local(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().await;
        match topics.get_mut(topic).and_then(|p| p.local.take()) {
            Some(mut local) => {
                local.heartbeat.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop everything about `topic`, cancelling its heartbeat.
    pub(crate) async fn discard(&self, topic: &str) -> bool {
        match self.topics.write().await.remove(topic) {
            Some(mut presence) => {
                if let Some(local) = presence.local.as_mut() {
                    local.heartbeat.cancel();
                }
                presence.bump();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::transport::{ChannelOptions, PeerUpdate};
    use serde_json::json;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn tracker(transport: &Arc<MemoryTransport>) -> PresenceTracker {
        PresenceTracker::new(transport.clone(), &PresenceConfig::default())
    }

    #[tokio::test]
    async fn track_requires_known_topic() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        let err = tracker.track("room", json!({})).await.unwrap_err();
        assert!(matches!(err, RealtimeError::NotSubscribed(t) if t == "room"));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_republishes_every_interval() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;

        tracker.track("room", json!({"status": "online"})).await.unwrap();
        assert_eq!(transport.track_count("room").await, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(transport.track_count("room").await, 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(transport.track_count("room").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_without_heartbeat_goes_stale() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;

        tracker
            .apply("room", PresenceMessage::Join(PeerUpdate::new("bob", json!({}))))
            .await;
        assert_eq!(tracker.peers("room").await.len(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(tracker.peers("room").await.len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tracker.peers("room").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn discard_cancels_heartbeat() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        tracker.track("room", json!({})).await.unwrap();
        assert!(tracker.heartbeat_active("room").await);

        assert!(tracker.discard("room").await);
        assert!(!tracker.discard("room").await);

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(transport.track_count("room").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrack_replaces_metadata_and_single_heartbeat() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        tracker.track("room", json!({"v": 1})).await.unwrap();
        tracker.track("room", json!({"v": 2})).await.unwrap();
        assert_eq!(tracker.tracked_metadata("room").await, Some(json!({"v": 2})));

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        // Two initial publishes plus one heartbeat, not two.
        assert_eq!(transport.track_count("room").await, 3);
        assert_eq!(transport.tracked("room").await, Some(json!({"v": 2})));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_local_halts_heartbeat_but_keeps_view() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        tracker
            .apply("room", PresenceMessage::Join(PeerUpdate::new("bob", json!({}))))
            .await;
        tracker.track("room", json!({})).await.unwrap();

        assert!(tracker.stop_local("room").await);
        assert!(!tracker.stop_local("room").await);
        assert!(!tracker.heartbeat_active("room").await);
        assert_eq!(tracker.tracked_metadata("room").await, None);
        assert_eq!(tracker.peers("room").await.len(), 1);

        tokio::time::advance(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(transport.track_count("room").await, 1);
    }

    #[tokio::test]
    async fn untrack_stops_publishing() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        tracker.track("room", json!({})).await.unwrap();

        assert!(tracker.untrack("room").await);
        assert!(!tracker.untrack("room").await);
        assert!(!tracker.heartbeat_active("room").await);
        assert_eq!(transport.tracked("room").await, None);
    }

    #[tokio::test]
    async fn own_echo_appears_in_peers() {
        let transport = Arc::new(MemoryTransport::connected());
        let mut inbound = transport
            .open_channel("room", &ChannelOptions::default().with_presence_key("me"))
            .await
            .unwrap();
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        let mut version = tracker.watch_version("room").await.unwrap();

        tracker.track("room", json!({"status": "online"})).await.unwrap();
        if let Some(crate::transport::InboundMessage::Presence(msg)) = inbound.recv().await {
            tracker.apply("room", msg).await;
        }

        assert!(version.has_changed().unwrap());
        version.borrow_and_update();
        let peers = tracker.peers("room").await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "me");
        assert_eq!(peers[0].metadata["status"], "online");
    }

    #[tokio::test]
    async fn reset_epoch_clears_view_and_returns_metadata() {
        let transport = Arc::new(MemoryTransport::connected());
        let tracker = tracker(&transport);
        tracker.open_topic("room").await;
        tracker
            .apply("room", PresenceMessage::Join(PeerUpdate::new("bob", json!({}))))
            .await;
        assert_eq!(tracker.reset_epoch("room").await, None);
        assert!(tracker.peers("room").await.is_empty());

        tracker.track("room", json!({"v": 1})).await.unwrap();
        assert_eq!(tracker.reset_epoch("room").await, Some(json!({"v": 1})));
    }
}
