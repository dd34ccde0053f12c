//! Core traits for cache operations

mod key;
mod metrics;
mod serializer;
mod store;
mod tracing_metrics;

pub use key::{CacheKey, CompositeKey, encode_key_component};
pub use metrics::{CacheMetrics, CacheOperation, EvictionReason, NoopMetrics, family_label};
pub use serializer::{JsonSerializer, Serializer};
pub use store::KeyValueStore;
pub use tracing_metrics::TracingMetrics;

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;
