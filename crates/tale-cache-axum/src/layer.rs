use crate::middleware::{InvalidateOnWrite, InvalidationRules};
use std::sync::Arc;
use tale_cache::{CacheManager, CacheMetrics, KeyValueStore, Serializer};
use tower::Layer;

/// Layer that drops cached resource families after successful writes
pub struct InvalidateLayer<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    manager: CacheManager<B, S, M>,
    rules: Arc<InvalidationRules>,
}

impl<B, S, M> Clone for InvalidateLayer<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<B, S, M> InvalidateLayer<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    /// Use [`InvalidationRules::standard`]
    pub fn new(manager: CacheManager<B, S, M>) -> Self {
        Self::with_rules(manager, InvalidationRules::standard())
    }

    pub fn with_rules(manager: CacheManager<B, S, M>, rules: InvalidationRules) -> Self {
        Self {
            manager,
            rules: Arc::new(rules),
        }
    }
}

impl<Svc, B, S, M> Layer<Svc> for InvalidateLayer<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    type Service = InvalidateOnWrite<Svc, B, S, M>;

    fn layer(&self, inner: Svc) -> Self::Service {
        InvalidateOnWrite::new(inner, self.manager.clone(), self.rules.clone())
    }
}
