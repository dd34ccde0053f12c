//! tale-cache-axum: cache administration routes and write invalidation
//!
//! ```rust,no_run
//! use axum::Router;
//! use tale_cache::{CacheManager, MemoryStore};
//! use tale_cache_axum::{InvalidateLayer, admin_router};
//!
//! let cache = CacheManager::new(MemoryStore::with_defaults());
//! let app: Router = Router::new()
//!     .nest("/admin/cache", admin_router(cache.clone()))
//!     .layer(InvalidateLayer::new(cache));
//! ```

pub mod extractor;
pub mod layer;
pub mod middleware;
pub mod routes;

pub use extractor::Cache;
pub use layer::InvalidateLayer;
pub use middleware::{InvalidateOnWrite, InvalidationRules};
pub use routes::{admin_router, admin_routes};
