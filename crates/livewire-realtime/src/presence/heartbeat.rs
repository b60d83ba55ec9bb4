use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::transport::Transport;

/// Periodic re-publish of this client's presence on one topic.
///
/// Cancelling is idempotent; dropping the task cancels it.
pub(crate) struct HeartbeatTask {
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTask {
    /// Start publishing every `interval`, beginning one interval from now.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        topic: String,
        metadata: Value,
        interval: Duration,
    ) -> Self {
        let start = Instant::now() + interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match transport.track(&topic, metadata.clone()).await {
                    Ok(()) => debug!(topic = %topic, "presence heartbeat sent"),
                    Err(e) => warn!(topic = %topic, error = %e, "presence heartbeat failed"),
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Stop the task. Returns `false` if it was already stopped.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
