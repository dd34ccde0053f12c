use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;

use tale_cache_core::{CacheKey, CacheMetrics, Cached, KeyValueStore, Result, Serializer};

use crate::CacheManager;
use crate::resource::ResourceClass;

/// Cache operations confined to one resource family
///
/// Keys are variants under the family prefix (`"all"`, `"page=2"`) and
/// writes use the family's TTL.
pub struct ResourceScope<'a, B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    manager: &'a CacheManager<B, S, M>,
    class: ResourceClass,
}

impl<'a, B, S, M> ResourceScope<'a, B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    pub(crate) fn new(manager: &'a CacheManager<B, S, M>, class: ResourceClass) -> Self {
        Self { manager, class }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Get the family-qualified key for a variant
    pub fn scoped_key(&self, variant: impl CacheKey) -> String {
        format!("{}:{}", self.class.family(), variant.full_key())
    }

    pub async fn get<T>(&self, variant: impl CacheKey) -> Option<Cached<T>>
    where
        T: DeserializeOwned,
    {
        self.manager.get(self.scoped_key(variant)).await
    }

    /// Store a variant with the family's TTL
    pub async fn set<T>(&self, variant: impl CacheKey, value: T) -> bool
    where
        T: Serialize,
    {
        self.manager
            .set_for(self.class, self.scoped_key(variant), value)
            .await
    }

    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        variant: impl CacheKey,
        producer: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.manager
            .get_or_compute(self.scoped_key(variant), self.class, producer)
            .await
    }

    pub async fn invalidate(&self, variant: impl CacheKey) -> bool {
        self.manager.invalidate(self.scoped_key(variant)).await
    }

    /// Drop every variant of the family
    pub async fn invalidate_all(&self) -> u64 {
        self.manager.invalidate_class(self.class).await
    }
}
