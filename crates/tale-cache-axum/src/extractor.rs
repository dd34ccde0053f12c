use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tale_cache::{CacheManager, CacheMetrics, KeyValueStore, Serializer};

/// Extractor to access CacheManager from Axum handlers
///
/// Works with any router state the manager can be taken from via
/// [`FromRef`].
pub struct Cache<B, S, M>(pub CacheManager<B, S, M>)
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics;

impl<State, B, S, M> FromRequestParts<State> for Cache<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
    State: Send + Sync,
    CacheManager<B, S, M>: FromRef<State>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(_parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        Ok(Cache(CacheManager::<B, S, M>::from_ref(state)))
    }
}

impl<B, S, M> std::ops::Deref for Cache<B, S, M>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    type Target = CacheManager<B, S, M>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
