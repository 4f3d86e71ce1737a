//! HTTP router.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/stats", get(api::stats))
        .route("/alert-status/{hash}", get(api::alert_status))
        .route("/pipelines/{id}/executions", get(api::pipeline_executions))
        .route("/pipelines/{id}/stats", get(api::pipeline_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
