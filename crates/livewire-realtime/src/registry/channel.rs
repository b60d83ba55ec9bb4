//! Channel records owned by the registry.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::handle::SubscriberId;
use crate::error::TransportError;
use crate::event::ChannelEvent;
use crate::transport::ChannelOptions;

/// Identity of one channel instance. A topic reopened after teardown gets a
/// fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u64);

/// Registry-internal lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribing,
    Subscribed,
    Reconnecting,
    Unsubscribing,
    Closed,
}

/// What subscribers observe on their handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    Subscribing,
    Subscribed,
    /// Waiting for the supervisor to rejoin.
    Reconnecting {
        last_error: Option<TransportError>,
    },
    /// Reconnection gave up; registrations are kept for a manual retry.
    Disconnected,
    Closed,
}

impl ChannelStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ChannelStatus::Subscribed)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Bounded ring of the most recent events on a channel. Oldest events are
/// evicted when full.
#[derive(Debug)]
pub struct ChannelHistory {
    capacity: usize,
    events: VecDeque<ChannelEvent>,
}

impl ChannelHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn push(&mut self, event: ChannelEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChannelEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<ChannelEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

pub(crate) struct ChannelEntry {
    pub(crate) id: ChannelId,
    pub(crate) topic: String,
    pub(crate) state: ChannelState,
    /// Attached subscribers; the ref count is its size.
    pub(crate) subscribers: HashSet<SubscriberId>,
    /// Subscribers waiting on the in-flight first open.
    pub(crate) pending: HashSet<SubscriberId>,
    pub(crate) options: ChannelOptions,
    /// Set while the transport owes us a (re)join.
    pub(crate) pending_resubscribe: bool,
    pub(crate) last_error: Option<TransportError>,
    pub(crate) status_tx: watch::Sender<ChannelStatus>,
    pub(crate) history: Arc<Mutex<ChannelHistory>>,
    pub(crate) pump: Option<JoinHandle<()>>,
}

impl ChannelEntry {
    pub(crate) fn new(id: ChannelId, topic: &str, options: ChannelOptions, history_capacity: usize) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Subscribing);
        Self {
            id,
            topic: topic.to_string(),
            state: ChannelState::Idle,
            subscribers: HashSet::new(),
            pending: HashSet::new(),
            options,
            pending_resubscribe: false,
            last_error: None,
            status_tx,
            history: Arc::new(Mutex::new(ChannelHistory::new(history_capacity))),
            pump: None,
        }
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn transition(&mut self, next: ChannelState) {
        debug!(topic = %self.topic, from = ?self.state, to = ?next, "channel state");
        self.state = next;
    }

    pub(crate) fn publish(&self, status: ChannelStatus) {
        self.status_tx.send_replace(status);
    }

    pub(crate) fn replace_pump(&mut self, pump: JoinHandle<()>) {
        if let Some(old) = self.pump.replace(pump) {
            old.abort();
        }
    }

    pub(crate) fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
