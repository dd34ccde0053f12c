//! Cache administration endpoints
//!
//! Every route maps to one [`CacheManager`] method and answers with a JSON
//! object carrying `success`.

use axum::{
    Json, Router,
    extract::{FromRef, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tale_cache::{
    CacheManager, CacheMetrics, KeyValueStore, ManagerStats, ResourceClass, Serializer,
    SignalResponse, StoreHealth,
};
use tracing::info;

use crate::extractor::Cache;

#[derive(Debug, Deserialize)]
pub struct PatternRequest {
    pub pattern: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignalQuery {
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    success: bool,
    #[serde(flatten)]
    health: StoreHealth,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    success: bool,
    #[serde(flatten)]
    stats: ManagerStats,
}

#[derive(Debug, Serialize)]
struct InvalidateResponse {
    success: bool,
    removed: u64,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn bad_request(error: impl Into<String>) -> Response {
    let body = ErrorResponse {
        success: false,
        error: error.into(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Admin routes for any router state holding a [`CacheManager`]
///
/// # Endpoints
/// - `GET /health` - Check the store
/// - `GET /stats` - Hit/miss counters and entry count
/// - `POST /clear` - Drop every entry
/// - `POST /invalidate/pattern` - `{ "pattern": "users:*" }`
/// - `POST /invalidate/key` - `{ "key": "stats:dashboard" }`
/// - `POST /invalidate/{stats,users,stories}` - Drop one resource family
/// - `GET /invalidation-signal?since=<generation>` - Client poll
pub fn admin_routes<State, B, S, M>() -> Router<State>
where
    State: Clone + Send + Sync + 'static,
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
    CacheManager<B, S, M>: FromRef<State>,
{
    Router::new()
        .route("/health", get(health::<B, S, M>))
        .route("/stats", get(stats::<B, S, M>))
        .route("/clear", post(clear::<B, S, M>))
        .route("/invalidate/pattern", post(invalidate_pattern::<B, S, M>))
        .route("/invalidate/key", post(invalidate_key::<B, S, M>))
        .route("/invalidate/stats", post(invalidate_stats::<B, S, M>))
        .route("/invalidate/users", post(invalidate_users::<B, S, M>))
        .route("/invalidate/stories", post(invalidate_stories::<B, S, M>))
        .route("/invalidation-signal", get(invalidation_signal::<B, S, M>))
}

/// [`admin_routes`] bound to a manager
pub fn admin_router<B, S, M>(manager: CacheManager<B, S, M>) -> Router
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    admin_routes::<CacheManager<B, S, M>, B, S, M>().with_state(manager)
}

async fn health<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    let health = cache.health_check().await;
    let status = if health.reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        success: health.reachable,
        health,
    };
    (status, Json(body)).into_response()
}

async fn stats<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    let body = StatsResponse {
        success: true,
        stats: cache.get_stats().await,
    };
    Json(body).into_response()
}

async fn clear<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    let success = cache.clear().await;
    info!(target: "tale_cache", success, "Cache cleared via admin route");
    Json(ClearResponse { success }).into_response()
}

async fn invalidate_pattern<B, S, M>(
    Cache(cache): Cache<B, S, M>,
    Json(req): Json<PatternRequest>,
) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    if req.pattern.trim().is_empty() {
        return bad_request("pattern must not be empty");
    }
    let removed = cache.invalidate_pattern(&req.pattern).await;
    info!(target: "tale_cache", pattern = %req.pattern, removed, "Pattern invalidated via admin route");
    Json(InvalidateResponse {
        success: true,
        removed,
    })
    .into_response()
}

async fn invalidate_key<B, S, M>(
    Cache(cache): Cache<B, S, M>,
    Json(req): Json<KeyRequest>,
) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    if req.key.is_empty() {
        return bad_request("key must not be empty");
    }
    let removed = cache.invalidate(req.key.as_str()).await;
    Json(InvalidateResponse {
        success: true,
        removed: u64::from(removed),
    })
    .into_response()
}

async fn invalidate_family<B, S, M>(cache: &CacheManager<B, S, M>, class: ResourceClass) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    let removed = cache.invalidate_class(class).await;
    info!(target: "tale_cache", family = %class, removed, "Family invalidated via admin route");
    Json(InvalidateResponse {
        success: true,
        removed,
    })
    .into_response()
}

async fn invalidate_stats<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    invalidate_family(&cache, ResourceClass::Stats).await
}

async fn invalidate_users<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    invalidate_family(&cache, ResourceClass::Users).await
}

async fn invalidate_stories<B, S, M>(Cache(cache): Cache<B, S, M>) -> Response
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    invalidate_family(&cache, ResourceClass::Stories).await
}

async fn invalidation_signal<B, S, M>(
    Cache(cache): Cache<B, S, M>,
    Query(query): Query<SignalQuery>,
) -> Json<SignalResponse>
where
    B: KeyValueStore,
    S: Serializer,
    M: CacheMetrics,
{
    Json(cache.instructions_since(query.since).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tale_cache::{JsonSerializer, MemoryStore, NoopMetrics};
    use tower::util::ServiceExt;

    fn create_test_app() -> (CacheManager<MemoryStore>, Router) {
        let cache = CacheManager::new(MemoryStore::with_defaults());
        (cache.clone(), admin_router(cache))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_, app) = create_test_app();
        let (status, body) = send(app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"success": true, "backend": "memory", "reachable": true, "latencyMs": 0})
        );
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (cache, app) = create_test_app();
        cache.set("stats:dashboard", &1u32, Duration::from_secs(60)).await;
        cache.get::<u32>("stats:dashboard").await;

        let (status, body) = send(app, "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"success": true, "hitCount": 1, "missCount": 0, "backend": "memory", "entryCount": 1})
        );
    }

    #[tokio::test]
    async fn test_invalidate_pattern_endpoint() {
        let (cache, app) = create_test_app();
        cache.set("users:all", &1u32, Duration::from_secs(60)).await;
        cache.set("users:page=2", &2u32, Duration::from_secs(60)).await;
        cache.set("stats:all", &3u32, Duration::from_secs(60)).await;

        let (status, body) = send(
            app.clone(),
            "POST",
            "/invalidate/pattern",
            Some(json!({"pattern": "users:*"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "removed": 2}));
        assert!(cache.get::<u32>("stats:all").await.is_some());

        let (status, body) = send(app, "POST", "/invalidate/pattern", Some(json!({"pattern": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_invalidate_key_endpoint() {
        let (cache, app) = create_test_app();
        cache.set("stats:dashboard", &1u32, Duration::from_secs(60)).await;

        let (_, body) = send(
            app.clone(),
            "POST",
            "/invalidate/key",
            Some(json!({"key": "stats:dashboard"})),
        )
        .await;
        assert_eq!(body, json!({"success": true, "removed": 1}));

        let (_, body) = send(app, "POST", "/invalidate/key", Some(json!({"key": "stats:dashboard"}))).await;
        assert_eq!(body, json!({"success": true, "removed": 0}));
    }

    #[tokio::test]
    async fn test_family_endpoints() {
        let (cache, app) = create_test_app();
        for class in ResourceClass::ALL {
            cache.set_for(class, class.key(), &1u32).await;
        }

        for family in ["stats", "users", "stories"] {
            let (status, body) = send(app.clone(), "POST", &format!("/invalidate/{family}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"success": true, "removed": 1}));
        }
        assert_eq!(cache.get_stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_clear_endpoint() {
        let (cache, app) = create_test_app();
        cache.set("stories:all", &1u32, Duration::from_secs(60)).await;

        let (status, body) = send(app, "POST", "/clear", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        assert_eq!(cache.get_stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_invalidation_signal_endpoint() {
        let (cache, app) = create_test_app();

        let (_, body) = send(app.clone(), "GET", "/invalidation-signal", None).await;
        assert_eq!(
            body,
            json!({"success": true, "instructions": {"clearAll": false}, "generation": 0})
        );

        cache.invalidate_users().await;

        let (_, body) = send(app.clone(), "GET", "/invalidation-signal?since=0", None).await;
        assert_eq!(
            body,
            json!({"success": true, "instructions": {"clearAll": true}, "generation": 1})
        );

        let (_, body) = send(app, "GET", "/invalidation-signal?since=1", None).await;
        assert_eq!(body["instructions"]["clearAll"], json!(false));
    }

    #[tokio::test]
    async fn test_routes_nest_into_app_state() {
        #[derive(Clone)]
        struct AppState {
            cache: CacheManager<MemoryStore>,
        }

        impl FromRef<AppState> for CacheManager<MemoryStore> {
            fn from_ref(state: &AppState) -> Self {
                state.cache.clone()
            }
        }

        let state = AppState {
            cache: CacheManager::new(MemoryStore::with_defaults()),
        };
        let app = Router::new()
            .nest("/admin/cache", admin_routes::<AppState, MemoryStore, JsonSerializer, NoopMetrics>())
            .with_state(state);

        let (status, _) = send(app, "GET", "/admin/cache/stats", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
