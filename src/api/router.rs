//! HTTP router.
//!
//! Layers (outermost → innermost): CORS (when enabled) → access log →
//! body limit → handler.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the application router over shared state.
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    let server = &ctx.core.config().server;
    let body_limit = server.max_upload_bytes;
    let permissive_cors = server.permissive_cors;

    let router = Router::new()
        .route("/", get(endpoints::index::page))
        .route("/health", get(endpoints::health::check))
        .route("/extract", post(endpoints::extract::upload))
        .route("/predict", post(endpoints::predict::manual))
        .route("/analyze", post(endpoints::analyze::upload))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access));

    if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
