use crate::{CacheMetrics, CacheOperation, EvictionReason, family_label};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str) {
        debug!(
            target: "tale_cache",
            event = "hit",
            key = %key,
            service = ?self.service_name,
            "Cache Hit"
        );
    }

    fn record_miss(&self, key: &str) {
        debug!(
            target: "tale_cache",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "Cache Miss"
        );
    }

    fn record_stale_served(&self, key: &str) {
        warn!(
            target: "tale_cache",
            event = "stale_served",
            key = %key,
            service = ?self.service_name,
            "Serving stale entry after producer failure"
        );
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        trace!(
            target: "tale_cache",
            event = "latency",
            operation = operation.as_str(),
            duration_ms = duration.as_millis() as u64,
            service = ?self.service_name,
            "Cache Operation Latency"
        );
    }

    fn record_invalidation(&self, pattern: &str, removed: u64) {
        debug!(
            target: "tale_cache",
            event = "invalidation",
            family = %family_label(pattern),
            pattern = %pattern,
            removed,
            service = ?self.service_name,
            "Cache Invalidation"
        );
    }

    fn record_eviction(&self, reason: EvictionReason) {
        debug!(
            target: "tale_cache",
            event = "eviction",
            reason = reason.as_str(),
            service = ?self.service_name,
            "Cache Eviction"
        );
    }

    fn record_backend_error(&self, operation: CacheOperation) {
        warn!(
            target: "tale_cache",
            event = "backend_error",
            operation = operation.as_str(),
            service = ?self.service_name,
            "Cache Backend Error"
        );
    }
}
