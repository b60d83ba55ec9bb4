//! Order-independent presence merging.
//!
//! Joins and heartbeats carry a timestamp; a leave records a tombstone at
//! its timestamp so a late-arriving older join cannot resurrect the peer.
//! Applying the same set of updates in any order yields the same view.
//! A full sync starts a new epoch and replaces everything.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::warn;

use crate::transport::{PeerUpdate, PresenceMessage};

/// One peer's most recent presence.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub peer_id: String,
    pub metadata: Map<String, Value>,
    pub last_heartbeat_at: Instant,
}

#[derive(Debug, Clone)]
pub struct PresenceState {
    entries: HashMap<String, PresenceEntry>,
    tombstones: HashMap<String, Instant>,
    stale_after: Duration,
}

impl PresenceState {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            tombstones: HashMap::new(),
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Merge one message. Returns whether the stored view changed.
    pub fn apply(&mut self, message: PresenceMessage) -> bool {
        match message {
            PresenceMessage::Sync(peers) => {
                self.apply_sync(peers);
                true
            }
            PresenceMessage::Join(update) | PresenceMessage::Heartbeat(update) => {
                self.apply_join(update)
            }
            PresenceMessage::Leave { peer_id, at } => self.apply_leave(&peer_id, at),
        }
    }

    /// Replace the view with `peers`. Duplicate peers keep their newest update.
    pub fn apply_sync(&mut self, peers: Vec<PeerUpdate>) {
        self.entries.clear();
        self.tombstones.clear();
        for update in peers {
            self.apply_join(update);
        }
    }

    /// Insert or refresh a peer. Older updates than what is stored, or than
    /// the peer's last leave, are ignored.
    pub fn apply_join(&mut self, update: PeerUpdate) -> bool {
        let Some(metadata) = parse_metadata(&update) else {
            return false;
        };
        if self
            .tombstones
            .get(&update.peer_id)
            .is_some_and(|left_at| *left_at >= update.at)
        {
            return false;
        }
        if let Some(existing) = self.entries.get(&update.peer_id) {
            if existing.last_heartbeat_at > update.at {
                return false;
            }
            if existing.last_heartbeat_at == update.at && existing.metadata == metadata {
                return false;
            }
        }
        self.entries.insert(
            update.peer_id.clone(),
            PresenceEntry {
                peer_id: update.peer_id,
                metadata,
                last_heartbeat_at: update.at,
            },
        );
        true
    }

    /// Remove a peer whose presence is not newer than `at`. On equal
    /// timestamps the leave wins.
    pub fn apply_leave(&mut self, peer_id: &str, at: Instant) -> bool {
        let tombstone = self.tombstones.entry(peer_id.to_string()).or_insert(at);
        if *tombstone < at {
            *tombstone = at;
        }
        match self.entries.get(peer_id) {
            Some(entry) if entry.last_heartbeat_at <= at => {
                self.entries.remove(peer_id);
                true
            }
            _ => false,
        }
    }

    /// Non-stale peers as of `now`, sorted by peer id. Stale entries and
    /// tombstones are pruned on the way.
    pub fn peers(&mut self, now: Instant) -> Vec<PresenceEntry> {
        self.prune(now);
        let mut peers: Vec<PresenceEntry> = self.entries.values().cloned().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Same as [`peers`](Self::peers) without pruning.
    pub fn snapshot(&self, now: Instant) -> Vec<PresenceEntry> {
        let mut peers: Vec<PresenceEntry> = self
            .entries
            .values()
            .filter(|e| self.is_live(e.last_heartbeat_at, now))
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.tombstones.clear();
    }

    fn prune(&mut self, now: Instant) {
        let stale_after = self.stale_after;
        let live = |at: Instant| now.saturating_duration_since(at) < stale_after;
        self.entries.retain(|_, e| live(e.last_heartbeat_at));
        self.tombstones.retain(|_, at| live(*at));
    }

    fn is_live(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) < self.stale_after
    }
}

fn parse_metadata(update: &PeerUpdate) -> Option<Map<String, Value>> {
    if update.peer_id.is_empty() {
        warn!("presence update without peer id, skipping");
        return None;
    }
    match &update.metadata {
        Value::Object(map) => Some(map.clone()),
        Value::Null => Some(Map::new()),
        other => {
            warn!(peer = %update.peer_id, metadata = %other, "malformed presence metadata, skipping");
            None
        }
    }
}
