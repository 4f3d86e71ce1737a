//! Read-only operational endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vigil_cache::AlertStatus;
use vigil_core::hash::hash_to_u64;
use vigil_core::StatsSnapshot;
use vigil_queue::QueueStatus;

use crate::state::AppState;

const DEFAULT_EXECUTION_LIMIT: usize = 20;
const MAX_EXECUTION_LIMIT: usize = 500;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub endpoint: String,
    pub is_leader: bool,
    pub queue: QueueStatus,
    pub alert_status_entries: usize,
    pub rules_cached: usize,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        endpoint: state.endpoint.clone(),
        is_leader: state.ring.is_leader(&state.endpoint),
        queue: state.queue.status(),
        alert_status_entries: state.alert_status.len(),
        rules_cached: state.caches.rules.len(),
        counters: state.stats.snapshot(),
    })
}

pub async fn alert_status(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<AlertStatus>, StatusCode> {
    state
        .alert_status
        .get(hash_to_u64(&hash))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

fn store_failure(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "execution store query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

pub async fn pipeline_executions(
    State(state): State<Arc<AppState>>,
    Path(pipeline_id): Path<i64>,
    Query(params): Query<ListParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EXECUTION_LIMIT)
        .clamp(1, MAX_EXECUTION_LIMIT);
    match state.executions.list(pipeline_id, limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn pipeline_stats(
    State(state): State<Arc<AppState>>,
    Path(pipeline_id): Path<i64>,
) -> Response {
    match state.executions.stats(pipeline_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_failure(e),
    }
}
