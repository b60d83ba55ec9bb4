use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read-through cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used by callers that do not pass their own.
    pub default_ttl_secs: u64,
    /// Advisory size limit. Exceeding it is logged; nothing is evicted.
    pub max_entries: usize,
    /// Minimum time between expiry sweeps triggered by writes.
    pub sweep_interval_secs: u64,
    /// Namespace for keys in the persistent store.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_entries: 500,
            sweep_interval_secs: 60,
            key_prefix: "cache_".into(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
