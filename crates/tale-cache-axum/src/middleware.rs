use axum::{
    body::Body,
    http::{Method, Request, Response},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tale_cache::{CacheManager, CacheMetrics, KeyValueStore, ResourceClass, Serializer};
use tower_service::Service;
use tracing::debug;

/// Which resource families a successful write under a path prefix touches
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    rules: Vec<(String, Vec<ResourceClass>)>,
}

impl InvalidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// User and story writes, which also move the aggregate statistics
    pub fn standard() -> Self {
        Self::new()
            .on_prefix("/api/users", [ResourceClass::Users, ResourceClass::Stats])
            .on_prefix("/api/stories", [ResourceClass::Stories, ResourceClass::Stats])
    }

    pub fn on_prefix(
        mut self,
        prefix: impl Into<String>,
        classes: impl IntoIterator<Item = ResourceClass>,
    ) -> Self {
        self.rules.push((prefix.into(), classes.into_iter().collect()));
        self
    }

    /// Families to drop after a write to `path`, each at most once
    pub fn classes_for(&self, path: &str) -> Vec<ResourceClass> {
        let mut classes = Vec::new();
        for (prefix, targets) in &self.rules {
            let matches = path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            if !matches {
                continue;
            }
            for class in targets {
                if !classes.contains(class) {
                    classes.push(*class);
                }
            }
        }
        classes
    }
}

fn is_write(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Service that invalidates resource families after successful writes
pub struct InvalidateOnWrite<S, B, Ser, M>
where
    B: KeyValueStore,
    Ser: Serializer,
    M: CacheMetrics,
{
    inner: S,
    manager: CacheManager<B, Ser, M>,
    rules: Arc<InvalidationRules>,
}

impl<S: Clone, B, Ser, M> Clone for InvalidateOnWrite<S, B, Ser, M>
where
    B: KeyValueStore,
    Ser: Serializer,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            manager: self.manager.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<S, B, Ser, M> InvalidateOnWrite<S, B, Ser, M>
where
    B: KeyValueStore,
    Ser: Serializer,
    M: CacheMetrics,
{
    pub fn new(inner: S, manager: CacheManager<B, Ser, M>, rules: Arc<InvalidationRules>) -> Self {
        Self {
            inner,
            manager,
            rules,
        }
    }
}

impl<S, B, Ser, M> Service<Request<Body>> for InvalidateOnWrite<S, B, Ser, M>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: KeyValueStore,
    Ser: Serializer,
    M: CacheMetrics,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let classes = if is_write(req.method()) {
            self.rules.classes_for(req.uri().path())
        } else {
            Vec::new()
        };
        let manager = self.manager.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            if response.status().is_success() {
                for class in classes {
                    let removed = manager.invalidate_class(class).await;
                    debug!(target: "tale_cache", family = %class, removed, "Invalidated after write");
                }
            }
            Ok(response)
        })
    }
}
