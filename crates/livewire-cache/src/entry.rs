//! Cache entries and their persisted form.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A stored value. Replaced wholesale on write, never patched.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: Instant,
    /// Wall-clock store time in unix millis, used to age persisted entries.
    pub stored_at_ms: i64,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at: Instant::now(),
            stored_at_ms: chrono::Utc::now().timestamp_millis(),
            ttl,
        }
    }

    /// Valid iff `now - stored_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    pub(crate) fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            value: self.value.clone(),
            stored_at_ms: self.stored_at_ms,
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Rebuild an entry from storage, or `None` if it has already expired.
    pub(crate) fn from_persisted(key: &str, persisted: PersistedEntry, now_ms: i64) -> Option<Self> {
        let age_ms = u64::try_from(now_ms.saturating_sub(persisted.stored_at_ms)).unwrap_or(0);
        if age_ms >= persisted.ttl_ms {
            return None;
        }
        let now = Instant::now();
        let stored_at = now
            .checked_sub(Duration::from_millis(age_ms))
            .unwrap_or(now);
        Some(Self {
            key: key.to_string(),
            value: persisted.value,
            stored_at,
            stored_at_ms: persisted.stored_at_ms,
            ttl: Duration::from_millis(persisted.ttl_ms),
        })
    }
}

/// JSON layout written to the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub value: serde_json::Value,
    pub stored_at_ms: i64,
    pub ttl_ms: u64,
}
