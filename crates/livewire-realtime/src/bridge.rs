//! Keeps cached reads honest: drop cache entries when the rows behind them
//! change.

use std::sync::Arc;

use livewire_cache::ReadThroughCache;
use tracing::debug;

use crate::event::ChangeFilter;
use crate::stream::{EventStream, ListenerId};

/// Invalidate every cache key containing `pattern` whenever a change
/// matching `filter` arrives on `topic`.
///
/// Invalidation runs in the background; the listener itself never blocks
/// event delivery.
pub async fn invalidate_on_change(
    stream: &EventStream,
    topic: &str,
    filter: ChangeFilter,
    cache: Arc<ReadThroughCache>,
    pattern: impl Into<String>,
) -> ListenerId {
    let pattern = pattern.into();
    stream
        .on_change(topic, filter, move |event| {
            let cache = cache.clone();
            let pattern = pattern.clone();
            debug!(table = %event.table, pattern = %pattern, "change invalidates cache");
            tokio::spawn(async move {
                cache.invalidate_pattern(&pattern).await;
            });
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEvent;
    use crate::memory::MemoryTransport;
    use livewire_cache::{MemoryStore, NetworkFlag};
    use livewire_config::CacheConfig;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn matching_change_invalidates_pattern() {
        let cache = Arc::new(ReadThroughCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NetworkFlag::default()),
            CacheConfig::default(),
        ));
        let ttl = Duration::from_secs(300);
        cache.set("courses_1", &"a", ttl).await.unwrap();
        cache.set("users_42", &"b", ttl).await.unwrap();

        let stream = EventStream::new(Arc::new(MemoryTransport::connected()));
        invalidate_on_change(
            &stream,
            "catalog",
            ChangeFilter::all().table("courses"),
            cache.clone(),
            "courses_",
        )
        .await;

        stream
            .dispatch_change(&ChangeEvent::insert("catalog", "users", json!({"id": 1})))
            .await;
        tokio::task::yield_now().await;
        assert_eq!(cache.len().await, 2);

        stream
            .dispatch_change(&ChangeEvent::update(
                "catalog",
                "courses",
                json!({"id": 1}),
                json!({"id": 1, "title": "new"}),
            ))
            .await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(cache.get::<String>("courses_1").await.is_none());
        assert_eq!(cache.get::<String>("users_42").await.as_deref(), Some("b"));
    }
}
