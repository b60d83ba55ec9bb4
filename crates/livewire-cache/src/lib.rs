//! Read-through cache with TTL expiry and substring invalidation.
//!
//! Values live in an in-memory map and are written behind to a persistent
//! [`KeyValueStore`]. Expired entries are treated as absent and dropped
//! lazily; there is no size-based eviction.

pub mod cache;
pub mod entry;
pub mod error;
pub mod network;
pub mod store;

pub use cache::{CacheStats, HydrateReport, ReadThroughCache};
pub use entry::CacheEntry;
pub use error::{CacheError, StoreError};
pub use network::{NetworkFlag, NetworkStatus};
pub use store::{KeyValueStore, MemoryStore};
