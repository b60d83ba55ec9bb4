use livewire_common::LivewireError;
use thiserror::Error;

/// Failures reported by a [`KeyValueStore`](crate::KeyValueStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Errors returned by [`ReadThroughCache`](crate::ReadThroughCache).
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache miss while the network is unreachable. Never papered over with
    /// stale or empty data.
    #[error("no cached data for '{key}' and no network connectivity")]
    NoCachedData { key: String },

    #[error("fetch failed for '{key}': {source}")]
    Fetch {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to serialize cache value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CacheError> for LivewireError {
    fn from(err: CacheError) -> Self {
        LivewireError::Cache(err.to_string())
    }
}
