use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Serialize;

use crate::http::messages::require_user;
use crate::http::response::HttpResult;
use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_connections: usize,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

pub async fn get_stats(State(state): State<AppState>, headers: HeaderMap) -> HttpResult {
    require_user(&state, &headers)?;
    let body = StatsResponse {
        active_connections: state.hub.active_connection_count().await,
        counters: state.metrics.snapshot(),
    };
    Ok(Json(body).into_response())
}
