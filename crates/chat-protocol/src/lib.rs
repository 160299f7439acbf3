// chat-protocol: WebSocket envelope types and serialization.
//
// One JSON object per frame, discriminated by a top-level `type` field.
// The same tag names appear in both directions with different payloads
// (`message`, `typing`), so inbound and outbound envelopes are separate
// enums rather than one shared one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Client -> Server envelopes
// ---------------------------------------------------------------------------

/// Everything a connected client may send over the socket.
///
/// An unrecognized `type` deserializes to `Unknown` so the connection can
/// log and skip the frame instead of dropping the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Message(MessageSend),
    Typing(TypingSend),
    Read(ReadSend),
    Ping,
    #[serde(other)]
    Unknown,
}

/// Inbound `message` payload. Exactly one of `to` / `group_id` must be set;
/// the pipeline rejects frames violating that with `BAD_REQUEST` rather than
/// the codec, so partially-formed frames still produce a typed error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
}

/// Inbound `typing` indicator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

/// Inbound `read` marker covering one or more messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSend {
    pub message_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Server -> Client envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(MessageDelivery),
    Reaction(ReactionBroadcast),
    MessagesRead(ReadBroadcast),
    Typing(TypingBroadcast),
    Pong,
    Error(ErrorMessage),
}

/// A delivered chat message. `to` is set for direct messages, `group_id`
/// for group messages, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub id: Uuid,
    pub from: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// Display name of the original sender when this message was forwarded.
    /// A label, not an id — the original conversation is not linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Added,
    Removed,
}

/// One reaction row as carried in `reaction` broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Broadcast after a reaction upsert or removal. `reactions` is the full
/// current set for the message so clients never have to merge deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBroadcast {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub action: ReactionAction,
    pub reactions: Vec<ReactionEntry>,
}

/// Broadcast when a reader marks messages read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBroadcast {
    pub reader_id: Uuid,
    pub message_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

/// Fan-out of a typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingBroadcast {
    pub from: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

/// Typed error frame. The connection stays live after receiving one unless
/// the transport itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Error payload for the companion HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Frozen error codes, shared by WS error frames and HTTP envelopes.
pub mod error_codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const BLOCKED: &str = "BLOCKED";
    pub const TRANSIENT: &str = "TRANSIENT";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
}
