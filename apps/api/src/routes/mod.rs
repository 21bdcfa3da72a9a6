pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::layout::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Render passes
        .route("/api/v1/layout/preflight", post(handlers::handle_preflight))
        .route(
            "/api/v1/layout/precalculate",
            post(handlers::handle_precalculate),
        )
        .route("/api/v1/layout/finalize", post(handlers::handle_finalize))
        .route(
            "/api/v1/layout/ready/:document_id",
            get(handlers::handle_ready),
        )
        // Measurement cache
        .route("/api/v1/layout/cache", delete(handlers::handle_cache_clear))
        .route(
            "/api/v1/layout/cache/cleanup",
            post(handlers::handle_cache_cleanup),
        )
        .route(
            "/api/v1/layout/cache/evict",
            post(handlers::handle_cache_evict),
        )
        .route(
            "/api/v1/layout/cache/stats",
            get(handlers::handle_cache_stats),
        )
        .route(
            "/api/v1/layout/cache/snapshot",
            get(handlers::handle_cache_export).put(handlers::handle_cache_import),
        )
        .route(
            "/api/v1/layout/cache/warmup",
            post(handlers::handle_cache_warmup),
        )
        // Measurement database
        .route(
            "/api/v1/layout/database/learned",
            get(handlers::handle_learned_export).put(handlers::handle_learned_import),
        )
        .route("/api/v1/layout/database/learn", post(handlers::handle_learn))
        .route(
            "/api/v1/layout/database/estimate",
            post(handlers::handle_estimate),
        )
        .route(
            "/api/v1/layout/snapshots/save",
            post(handlers::handle_snapshots_save),
        )
        .with_state(state)
}
