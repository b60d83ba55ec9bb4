//! Presence heartbeat and staleness settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How often our own presence is re-published, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Peers without a heartbeat for this long are excluded.
    /// `None` means twice the heartbeat interval.
    pub stale_after_secs: Option<u64>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            stale_after_secs: None,
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        match self.stale_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.heartbeat_interval() * 2,
        }
    }
}
