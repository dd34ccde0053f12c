//! Metrics trait for cache observability

use std::time::Duration;

/// Cache operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Get,
    Set,
    Delete,
    Scan,
    Clear,
    Invalidate,
    Compute,
}

impl CacheOperation {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::Delete => "delete",
            CacheOperation::Scan => "scan",
            CacheOperation::Clear => "clear",
            CacheOperation::Invalidate => "invalidate",
            CacheOperation::Compute => "compute",
        }
    }
}

/// Reason an entry left the cache without an explicit delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// TTL expired
    Expired,
    /// Capacity limit reached
    Capacity,
    /// Stored bytes could not be decoded
    Corrupted,
}

impl EvictionReason {
    /// Get reason as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Corrupted => "corrupted",
        }
    }
}

/// Trait for cache metrics/observability
///
/// Implement this to integrate with your metrics system (Prometheus, StatsD, etc.)
pub trait CacheMetrics: Send + Sync + 'static {
    /// Record a cache hit
    fn record_hit(&self, key: &str);

    /// Record a cache miss
    fn record_miss(&self, key: &str);

    /// Record a stale entry served because recomputation failed
    fn record_stale_served(&self, key: &str);

    /// Record operation latency
    fn record_latency(&self, operation: CacheOperation, duration: Duration);

    /// Record a key or pattern invalidation and how many entries it removed
    fn record_invalidation(&self, pattern: &str, removed: u64);

    /// Record an eviction
    fn record_eviction(&self, reason: EvictionReason);

    /// Record a store failure that was absorbed
    fn record_backend_error(&self, operation: CacheOperation);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str) {}

    #[inline]
    fn record_miss(&self, _key: &str) {}

    #[inline]
    fn record_stale_served(&self, _key: &str) {}

    #[inline]
    fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}

    #[inline]
    fn record_invalidation(&self, _pattern: &str, _removed: u64) {}

    #[inline]
    fn record_eviction(&self, _reason: EvictionReason) {}

    #[inline]
    fn record_backend_error(&self, _operation: CacheOperation) {}
}

/// Metrics adapter using the `metrics` crate
///
/// Integrates with Prometheus, StatsD, and other exporters via the `metrics` ecosystem.
///
/// # Example
/// ```ignore
/// use tale_cache_core::MetricsCrateAdapter;
///
/// let metrics = MetricsCrateAdapter::new("tale_cache");
/// // Emits: tale_cache_hits_total, tale_cache_misses_total, etc.
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsCrateAdapter {
    prefix: String,
}

#[cfg(feature = "metrics")]
impl MetricsCrateAdapter {
    /// Create a new adapter with the given metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

/// Resource family of a key or pattern: its first `:` segment
///
/// Keeps label cardinality bounded where the full key would not.
pub fn family_label(key: &str) -> String {
    key.split(':').next().unwrap_or_default().to_string()
}

#[cfg(feature = "metrics")]
impl CacheMetrics for MetricsCrateAdapter {
    fn record_hit(&self, key: &str) {
        metrics::counter!(self.metric_name("hits_total"), "family" => family_label(key))
            .increment(1);
    }

    fn record_miss(&self, key: &str) {
        metrics::counter!(self.metric_name("misses_total"), "family" => family_label(key))
            .increment(1);
    }

    fn record_stale_served(&self, _key: &str) {
        metrics::counter!(self.metric_name("stale_served_total")).increment(1);
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        metrics::histogram!(
            self.metric_name("operation_duration_seconds"),
            "operation" => operation.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn record_invalidation(&self, pattern: &str, removed: u64) {
        metrics::counter!(
            self.metric_name("invalidated_entries_total"),
            "family" => family_label(pattern)
        )
        .increment(removed);
    }

    fn record_eviction(&self, reason: EvictionReason) {
        metrics::counter!(
            self.metric_name("evictions_total"),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    fn record_backend_error(&self, operation: CacheOperation) {
        metrics::counter!(
            self.metric_name("backend_errors_total"),
            "operation" => operation.as_str()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_as_str() {
        assert_eq!(CacheOperation::Get.as_str(), "get");
        assert_eq!(CacheOperation::Scan.as_str(), "scan");
        assert_eq!(CacheOperation::Invalidate.as_str(), "invalidate");
    }

    #[test]
    fn test_eviction_reason_as_str() {
        assert_eq!(EvictionReason::Expired.as_str(), "expired");
        assert_eq!(EvictionReason::Corrupted.as_str(), "corrupted");
    }

    #[test]
    fn test_family_label() {
        assert_eq!(family_label("users:page=2"), "users");
        assert_eq!(family_label("stats:*"), "stats");
        assert_eq!(family_label("plain"), "plain");
        assert_eq!(family_label(""), "");
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoopMetrics;
        metrics.record_hit("key");
        metrics.record_miss("key");
        metrics.record_invalidation("users:*", 3);
        metrics.record_latency(CacheOperation::Get, Duration::from_millis(1));
    }
}
