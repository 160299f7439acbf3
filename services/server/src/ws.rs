use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use chat_protocol::{error_codes, ErrorMessage, ServerEvent};
use serde::Deserialize;
use tracing::info;

use crate::auth::{self, extract_bearer};
use crate::connection;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Token fallback for clients that cannot set headers on the upgrade
    /// request (browsers).
    token: Option<String>,
}

pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(ToOwned::to_owned)
        .or(query.token);
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn send_ws_error(socket: &mut WebSocket, code: &str, message: &str) {
    let event = ServerEvent::Error(ErrorMessage {
        code: code.to_owned(),
        message: message.to_owned(),
        retryable: false,
    });
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json)).await;
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let user = match auth::verify_token(&state.config.jwt_secret, token.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            info!(error = %e, "websocket rejected");
            send_ws_error(&mut socket, error_codes::INVALID_TOKEN, &e.to_string()).await;
            return;
        }
    };
    connection::run(socket, state, user).await;
}
