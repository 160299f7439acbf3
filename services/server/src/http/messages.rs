//! Companion request/response API over the pipeline. These handlers do the
//! same work a connection task does, minus the socket: authenticate, call
//! the pipeline, translate errors.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chat_core::models::{Message, MessageTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{self, extract_bearer, AuthUser};
use crate::http::response::{self, HttpResult};
use crate::pipeline::{ForwardTargets, SendInput};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

pub(crate) fn require_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthUser, response::HttpResponse> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);
    auth::verify_token(&state.config.jwt_secret, token)
        .map_err(|e| response::unauthorized(e.to_string()))
}

/// Wire shape of a message in API responses; mirrors the WS `message`
/// envelope plus the delivery status.
#[derive(Debug, Serialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub from: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<String>,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Message> for MessageRecord {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            from: msg.sender_id,
            to: msg.target.recipient_id(),
            group_id: msg.target.group_id(),
            content: msg.content.clone(),
            media_id: msg.media_id,
            reply_to: msg.reply_to_id,
            forwarded_from: msg.forwarded_from.clone(),
            status: msg.status.as_str(),
            created_at: msg.created_at,
            scheduled_at: msg.scheduled_at,
            expires_at: msg.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub content: Option<String>,
    pub media_id: Option<Uuid>,
    pub reply_to: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    let input = SendInput {
        content: req.content,
        media_id: req.media_id,
        reply_to: req.reply_to,
        scheduled_at: req.scheduled_at,
        origin_conn: None,
    };
    let sent = match (req.to, req.group_id) {
        (Some(to), None) => state.pipeline.send_dm(user.id, to, input).await,
        (None, Some(group_id)) => state.pipeline.send_group(user.id, group_id, input).await,
        _ => {
            return Err(response::bad_request(
                "message needs exactly one of to / group_id",
            ))
        }
    };
    match sent {
        Ok(msg) => Ok((StatusCode::CREATED, Json(MessageRecord::from(&msg))).into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ForwardFailureRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub messages: Vec<MessageRecord>,
    pub failures: Vec<ForwardFailureRecord>,
}

pub async fn forward_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ForwardRequest>,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    if req.user_ids.is_empty() && req.group_ids.is_empty() {
        return Err(response::bad_request("no forward targets"));
    }
    let targets = ForwardTargets {
        user_ids: req.user_ids,
        group_ids: req.group_ids,
    };
    match state.pipeline.forward(user.id, message_id, targets, None).await {
        Ok(outcome) => {
            let body = ForwardResponse {
                messages: outcome.messages.iter().map(MessageRecord::from).collect(),
                failures: outcome
                    .failures
                    .into_iter()
                    .map(|f| ForwardFailureRecord {
                        user_id: match f.target {
                            MessageTarget::User(id) => Some(id),
                            MessageTarget::Group(_) => None,
                        },
                        group_id: match f.target {
                            MessageTarget::User(_) => None,
                            MessageTarget::Group(id) => Some(id),
                        },
                        code: f.error.code(),
                        message: f.error.to_string(),
                    })
                    .collect(),
            };
            Ok(Json(body).into_response())
        }
        Err(e) => Err(response::chat_error(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ReactRequest>,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state.pipeline.react(user.id, message_id, &req.emoji).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state.pipeline.unreact(user.id, message_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
    pub group_id: Option<Uuid>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MarkReadRequest>,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state
        .pipeline
        .mark_read(user.id, &req.message_ids, req.group_id)
        .await
    {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state.pipeline.cancel_scheduled(user.id, message_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

pub async fn dm_history(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state
        .pipeline
        .history_dm(user.id, peer_id, clamp_limit(query.limit))
        .await
    {
        Ok(messages) => Ok(Json(
            messages.iter().map(MessageRecord::from).collect::<Vec<_>>(),
        )
        .into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}

pub async fn group_history(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> HttpResult {
    let user = require_user(&state, &headers)?;
    match state
        .pipeline
        .history_group(user.id, group_id, clamp_limit(query.limit))
        .await
    {
        Ok(messages) => Ok(Json(
            messages.iter().map(MessageRecord::from).collect::<Vec<_>>(),
        )
        .into_response()),
        Err(e) => Err(response::chat_error(&e)),
    }
}
