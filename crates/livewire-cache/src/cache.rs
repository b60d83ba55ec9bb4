//! The read-through cache.


use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use livewire_config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, PersistedEntry};
use crate::error::CacheError;
use crate::network::NetworkStatus;
use crate::store::KeyValueStore;

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Outcome of [`ReadThroughCache::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateReport {
    pub loaded: usize,
    pub expired: usize,
    pub corrupt: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

/// TTL cache in front of expensive reads.
///
/// Concurrent [`get_or_fetch`](Self::get_or_fetch) calls for the same
/// missing key are not coalesced: each caller runs its own fetcher and the
/// last write wins.
pub struct ReadThroughCache {
    store: Arc<dyn KeyValueStore>,
    network: Arc<dyn NetworkStatus>,
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    last_sweep: Mutex<Instant>,
    counters: Counters,
}

impl ReadThroughCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn NetworkStatus>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            network,
            config,
            entries: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            counters: Counters::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    /// Load persisted entries into memory. Corrupt and expired entries are
    /// removed from the store and counted, never reported as errors.
    pub async fn hydrate(&self) -> Result<HydrateReport, CacheError> {
        let keys = self.own_store_keys().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut report = HydrateReport::default();
        let mut doomed = Vec::new();
        let mut loaded = Vec::new();

        for store_key in keys {
            let Some(key) = self.logical_key(&store_key).map(str::to_string) else {
                continue;
            };
            let raw = match self.store.get(&store_key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to read persisted cache entry");
                    continue;
                }
            };
            match serde_json::from_str::<PersistedEntry>(&raw) {
                Ok(persisted) => match CacheEntry::from_persisted(&key, persisted, now_ms) {
                    Some(entry) => loaded.push(entry),
                    None => {
                        report.expired += 1;
                        doomed.push(store_key);
                    }
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "dropping corrupt cache entry");
                    report.corrupt += 1;
                    doomed.push(store_key);
                }
            }
        }

        report.loaded = loaded.len();
        {
            let mut entries = self.entries.write().await;
            for entry in loaded {
                entries.insert(entry.key.clone(), entry);
            }
        }
        self.remove_persisted(&doomed).await;

        info!(
            loaded = report.loaded,
            expired = report.expired,
            corrupt = report.corrupt,
            "cache hydrated"
        );
        Ok(report)
    }

    /// Return a valid cached value, or `None`. Never performs I/O.
    ///
    /// An expired entry, or one that does not deserialize as `T`, is dropped
    /// from memory and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let stale_stamp = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if entry.is_valid_at(now) => {
                    match serde_json::from_value::<T>(entry.value.clone()) {
                        Ok(value) => {
                            self.counters.hits.fetch_add(1, Ordering::Relaxed);
                            return Some(value);
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "cached value has unexpected shape, dropping");
                            entry.stored_at
                        }
                    }
                }
                Some(entry) => entry.stored_at,
            }
        };

        // Re-check under the write lock: a concurrent set may have replaced it.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.stored_at == stale_stamp) {
            entries.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// Persistence is write-behind: a store failure is logged and the
    /// in-memory entry is kept.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, serde_json::to_value(value)?, ttl);
        let persisted = serde_json::to_string(&entry.to_persisted())?;

        let len = {
            let mut entries = self.entries.write().await;
            entries.insert(key.to_string(), entry);
            entries.len()
        };
        if len > self.config.max_entries {
            debug!(
                len,
                max_entries = self.config.max_entries,
                "cache above max_entries; size-based eviction is not performed"
            );
        }

        if let Err(e) = self.store.set(&self.store_key(key), persisted).await {
            warn!(key = %key, error = %e, "failed to persist cache entry");
        }

        self.maybe_sweep().await;
        Ok(())
    }

    /// Return the cached value if valid; otherwise fetch, store and return.
    ///
    /// Fails with [`CacheError::NoCachedData`] on a miss while the network is
    /// unreachable. The fetch cannot be cancelled: its result is cached even
    /// if the caller has gone away.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Duration,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        if !self.network.is_connected() {
            debug!(key = %key, "cache miss while offline");
            return Err(CacheError::NoCachedData {
                key: key.to_string(),
            });
        }

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let value = fetcher().await.map_err(|e| CacheError::Fetch {
            key: key.to_string(),
            source: Box::new(e),
        })?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Remove one entry. Returns whether it was present in memory.
    pub async fn invalidate(&self, key: &str) -> bool {
        let existed = self.entries.write().await.remove(key).is_some();
        if let Err(e) = self.store.remove(&self.store_key(key)).await {
            warn!(key = %key, error = %e, "failed to remove persisted cache entry");
        }
        existed
    }

    /// Remove every entry whose key contains `pattern`, in memory and in the
    /// store. Returns the number of distinct keys removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut removed: HashSet<String> = {
            let mut entries = self.entries.write().await;
            let matching: Vec<String> = entries
                .keys()
                .filter(|k| k.contains(pattern))
                .cloned()
                .collect();
            for key in &matching {
                entries.remove(key);
            }
            matching.into_iter().collect()
        };

        match self.own_store_keys().await {
            Ok(store_keys) => {
                let doomed: Vec<String> = store_keys
                    .into_iter()
                    .filter(|sk| self.logical_key(sk).is_some_and(|k| k.contains(pattern)))
                    .collect();
                for sk in &doomed {
                    if let Some(k) = self.logical_key(sk) {
                        removed.insert(k.to_string());
                    }
                }
                self.remove_persisted(&doomed).await;
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "failed to list persisted cache keys"),
        }

        debug!(pattern = %pattern, removed = removed.len(), "cache pattern invalidated");
        removed.len()
    }

    /// Remove all entries. Returns the number of distinct keys removed.
    pub async fn clear(&self) -> usize {
        let mut removed: HashSet<String> = self.entries.write().await.drain().map(|(k, _)| k).collect();
        match self.own_store_keys().await {
            Ok(store_keys) => {
                for sk in &store_keys {
                    if let Some(k) = self.logical_key(sk) {
                        removed.insert(k.to_string());
                    }
                }
                self.remove_persisted(&store_keys).await;
            }
            Err(e) => warn!(error = %e, "failed to list persisted cache keys"),
        }
        removed.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }

    /// Drop expired entries, at most once per sweep interval.
    async fn maybe_sweep(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock().await;
            if now.saturating_duration_since(*last) < self.config.sweep_interval() {
                return;
            }
            *last = now;
        }

        let expired: Vec<String> = {
            let mut entries = self.entries.write().await;
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, e)| !e.is_valid_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                entries.remove(key);
            }
            expired
        };
        if expired.is_empty() {
            return;
        }

        self.counters
            .evictions
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        let store_keys: Vec<String> = expired.iter().map(|k| self.store_key(k)).collect();
        self.remove_persisted(&store_keys).await;
        debug!(count = expired.len(), "swept expired cache entries");
    }

    async fn remove_persisted(&self, store_keys: &[String]) {
        if store_keys.is_empty() {
            return;
        }
        if let Err(e) = self.store.multi_remove(store_keys).await {
            warn!(count = store_keys.len(), error = %e, "failed to remove persisted cache entries");
        }
    }

    async fn own_store_keys(&self) -> Result<Vec<String>, CacheError> {
        let keys = self.store.get_all_keys().await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(&self.config.key_prefix))
            .collect())
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    fn logical_key<'a>(&self, store_key: &'a str) -> Option<&'a str> {
        store_key.strip_prefix(self.config.key_prefix.as_str())
    }
}
