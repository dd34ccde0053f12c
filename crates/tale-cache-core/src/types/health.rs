//! Store health reporting

use serde::{Deserialize, Serialize};

/// Which kind of store is serving the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Networked store shared between instances
    External,
    /// Process-local map
    Memory,
}

impl BackendKind {
    /// Get kind as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::External => "external",
            BackendKind::Memory => "memory",
        }
    }
}

/// Result of a store health check
///
/// Observability only; normal operations never gate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub backend: BackendKind,
    pub reachable: bool,
    pub latency_ms: u64,
}

impl StoreHealth {
    pub fn reachable(backend: BackendKind, latency_ms: u64) -> Self {
        Self {
            backend,
            reachable: true,
            latency_ms,
        }
    }

    pub fn unreachable(backend: BackendKind, latency_ms: u64) -> Self {
        Self {
            backend,
            reachable: false,
            latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_json_shape() {
        let health = StoreHealth::reachable(BackendKind::External, 3);
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"backend": "external", "reachable": true, "latencyMs": 3})
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(BackendKind::Memory.as_str(), "memory");
        assert_eq!(BackendKind::External.as_str(), "external");
    }
}
