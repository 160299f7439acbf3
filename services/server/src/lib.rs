pub mod auth;
pub mod authz;
pub mod config;
pub mod connection;
pub mod db;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod push;
pub mod repo;
pub mod scheduler;
pub mod state;
pub mod sweeper;
pub mod ws;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/chat", get(ws::ws_chat_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/messages", post(http::messages::send_message))
        .route("/api/v1/messages/read", post(http::messages::mark_read))
        .route(
            "/api/v1/messages/:message_id/forward",
            post(http::messages::forward_message),
        )
        .route(
            "/api/v1/messages/:message_id/reactions",
            post(http::messages::add_reaction).delete(http::messages::remove_reaction),
        )
        .route(
            "/api/v1/messages/:message_id/schedule",
            axum::routing::delete(http::messages::cancel_schedule),
        )
        .route("/api/v1/history/dm/:peer_id", get(http::messages::dm_history))
        .route(
            "/api/v1/history/group/:group_id",
            get(http::messages::group_history),
        )
        .route("/api/v1/stats", get(http::stats::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
