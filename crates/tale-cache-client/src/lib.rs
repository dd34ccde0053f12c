//! tale-cache-client: persisted client-side cache for fetched statistics
//!
//! Entries live in a [`PersistentStorage`] under the `stats_cache_` prefix
//! as `{ "data", "expiry", "cacheKey" }` JSON, expire after five minutes and
//! are dropped wholesale when the server raises an invalidation signal.
//!
//! ```
//! use tale_cache_client::{CacheParams, ClientStatsCache, MemoryStorage};
//!
//! let cache = ClientStatsCache::new(MemoryStorage::new());
//! let params = CacheParams::new("dashboard").param("page", 1);
//!
//! if cache.get_cached_data::<Vec<u32>>(&params).is_none() {
//!     let fetched = vec![5, 3, 2];
//!     cache.set_cached_data(&params, &fetched);
//! }
//! assert!(cache.is_cache_fresh(&params));
//! ```

mod cache;
mod params;
mod poller;
mod storage;

pub use cache::{ClientCacheConfig, ClientStatsCache, DEFAULT_PREFIX};
pub use params::CacheParams;
pub use poller::{InvalidationPoller, SignalSource};
pub use storage::{Availability, JsonFileStorage, MemoryStorage, PersistentStorage, StorageError};
pub use tale_cache_core::{Instructions, SignalResponse};
