//! Core types for cache operations

mod entry;
mod health;
mod lookup;
mod options;
mod signal;
mod stats;

pub use entry::CacheEntry;
pub use health::{BackendKind, StoreHealth};
pub use lookup::{Cached, Freshness, Lookup};
pub use options::{CacheOptions, CacheOpts};
pub use signal::{Instructions, SignalResponse};
pub use stats::CacheStats;
