//! The message pipeline: the only place messages are created or mutated.
//!
//! Every public operation takes the caller's identity and runs the
//! authorization predicates before touching persistence. Delivery is
//! at-least-once: persistence is the source of truth, fan-out is
//! best-effort, and offline recipients fall back to push.

use std::sync::Arc;

use axum::extract::ws::Message as WsFrame;
use chat_core::models::{
    Conversation, Message, MessageStatus, MessageTarget, NewMessage,
};
use chat_core::push::PushGateway;
use chat_core::repo::Repository;
use chat_core::ChatError;
use chat_protocol::{
    MessageDelivery, ReactionAction, ReactionBroadcast, ReactionEntry, ReadBroadcast, ServerEvent,
    TypingBroadcast,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::authz;
use crate::hub::Hub;
use crate::metrics::Metrics;

/// Payload of a send operation, shared by the WS and HTTP entry points.
#[derive(Debug, Clone, Default)]
pub struct SendInput {
    pub content: Option<String>,
    pub media_id: Option<Uuid>,
    pub reply_to: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Connection id that originated the send, excluded from the
    /// multi-device echo. None for HTTP callers.
    pub origin_conn: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ForwardTargets {
    pub user_ids: Vec<Uuid>,
    pub group_ids: Vec<Uuid>,
}

#[derive(Debug)]
pub struct ForwardFailure {
    pub target: MessageTarget,
    pub error: ChatError,
}

/// Created messages plus the per-target errors; partial success is normal.
#[derive(Debug, Default)]
pub struct ForwardOutcome {
    pub messages: Vec<Message>,
    pub failures: Vec<ForwardFailure>,
}

pub struct Pipeline {
    repo: Arc<dyn Repository>,
    hub: Arc<Hub>,
    push: Arc<dyn PushGateway>,
    metrics: Arc<Metrics>,
}

fn encode(event: &ServerEvent) -> Option<WsFrame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(WsFrame::Text(json)),
        Err(e) => {
            error!(error = %e, "failed to encode outbound event");
            None
        }
    }
}

fn delivery_event(msg: &Message) -> ServerEvent {
    ServerEvent::Message(MessageDelivery {
        id: msg.id,
        from: msg.sender_id,
        to: msg.target.recipient_id(),
        group_id: msg.target.group_id(),
        content: msg.content.clone(),
        media_id: msg.media_id,
        reply_to: msg.reply_to_id,
        forwarded_from: msg.forwarded_from.clone(),
        created_at: msg.created_at,
        expires_at: msg.expires_at,
    })
}

fn preview(msg: &Message) -> String {
    msg.content
        .clone()
        .unwrap_or_else(|| "Sent an attachment".to_owned())
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        hub: Arc<Hub>,
        push: Arc<dyn PushGateway>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            hub,
            push,
            metrics,
        }
    }

    // -- sending -----------------------------------------------------------

    pub async fn send_dm(
        &self,
        from: Uuid,
        to: Uuid,
        input: SendInput,
    ) -> Result<Message, ChatError> {
        if from == to {
            return Err(ChatError::bad_request("cannot message yourself"));
        }
        self.validate_payload(&input).await?;
        if authz::is_blocked(self.repo.as_ref(), from, to).await? {
            return Err(ChatError::Blocked);
        }
        self.create_and_deliver(
            from,
            MessageTarget::User(to),
            input.content,
            input.media_id,
            input.reply_to,
            None,
            input.scheduled_at,
            input.origin_conn,
        )
        .await
    }

    pub async fn send_group(
        &self,
        from: Uuid,
        group_id: Uuid,
        input: SendInput,
    ) -> Result<Message, ChatError> {
        if !authz::is_group_member(self.repo.as_ref(), from, group_id).await? {
            return Err(ChatError::forbidden("not a member of this group"));
        }
        self.validate_payload(&input).await?;
        self.create_and_deliver(
            from,
            MessageTarget::Group(group_id),
            input.content,
            input.media_id,
            input.reply_to,
            None,
            input.scheduled_at,
            input.origin_conn,
        )
        .await
    }

    async fn validate_payload(&self, input: &SendInput) -> Result<(), ChatError> {
        let has_content = input.content.as_deref().is_some_and(|c| !c.trim().is_empty());
        if !has_content && input.media_id.is_none() {
            return Err(ChatError::bad_request("message needs content or media"));
        }
        if let Some(media_id) = input.media_id {
            if !self.repo.media_approved(media_id).await? {
                return Err(ChatError::forbidden("media is not approved"));
            }
        }
        if let Some(at) = input.scheduled_at {
            if at <= Utc::now() {
                return Err(ChatError::bad_request("scheduled_at must be in the future"));
            }
        }
        Ok(())
    }

    /// Persist and, unless the message is scheduled, attempt delivery.
    /// Fan-out failures never fail the call: the message is durable and a
    /// reconnect picks it up from history.
    #[allow(clippy::too_many_arguments)]
    async fn create_and_deliver(
        &self,
        from: Uuid,
        target: MessageTarget,
        content: Option<String>,
        media_id: Option<Uuid>,
        reply_to: Option<Uuid>,
        forwarded_from: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
        origin_conn: Option<u64>,
    ) -> Result<Message, ChatError> {
        let now = Utc::now();
        let conversation = match target {
            MessageTarget::User(to) => Conversation::Dm(from, to),
            MessageTarget::Group(g) => Conversation::Group(g),
        };
        let timer = self.repo.disappearing_timer(conversation.canonical()).await?;
        let expires_at = (timer > 0).then(|| now + chrono::Duration::seconds(i64::from(timer)));

        let msg = self
            .repo
            .create_message(NewMessage {
                sender_id: from,
                target,
                content,
                media_id,
                reply_to_id: reply_to,
                forwarded_from,
                scheduled_at,
                expires_at,
                created_at: now,
            })
            .await?;
        Metrics::incr(&self.metrics.messages_sent);

        if msg.scheduled_at.is_some() {
            debug!(message_id = %msg.id, "message persisted for later delivery");
            return Ok(msg);
        }
        self.deliver(msg, origin_conn).await
    }

    async fn deliver(&self, msg: Message, origin_conn: Option<u64>) -> Result<Message, ChatError> {
        match msg.target {
            MessageTarget::User(_) => self.deliver_dm(msg, origin_conn).await,
            MessageTarget::Group(_) => self.deliver_group(msg, origin_conn).await,
        }
    }

    async fn deliver_dm(
        &self,
        mut msg: Message,
        origin_conn: Option<u64>,
    ) -> Result<Message, ChatError> {
        let Some(to) = msg.target.recipient_id() else {
            return Ok(msg);
        };
        let Some(frame) = encode(&delivery_event(&msg)) else {
            return Ok(msg);
        };

        if self.hub.send_to_user(to, &frame).await {
            if self.repo.update_message_status(msg.id, MessageStatus::Delivered).await? {
                msg.status = MessageStatus::Delivered;
            }
        } else {
            self.push_fallback(&msg, to).await;
        }
        // Multi-device echo to the sender's other connections.
        self.hub
            .send_to_user_except(msg.sender_id, origin_conn, &frame)
            .await;
        Ok(msg)
    }

    async fn deliver_group(
        &self,
        mut msg: Message,
        origin_conn: Option<u64>,
    ) -> Result<Message, ChatError> {
        let Some(group_id) = msg.target.group_id() else {
            return Ok(msg);
        };
        let Some(frame) = encode(&delivery_event(&msg)) else {
            return Ok(msg);
        };

        let members = self.repo.list_group_members(group_id).await?;
        let mut any_online = false;
        let mut offline: Vec<Uuid> = Vec::new();
        for member in members {
            if member == msg.sender_id {
                continue;
            }
            // A block in either direction drops both fan-out and push.
            if authz::is_blocked(self.repo.as_ref(), msg.sender_id, member).await? {
                continue;
            }
            if self.hub.send_to_user(member, &frame).await {
                any_online = true;
            } else {
                offline.push(member);
            }
        }

        if any_online
            && self
                .repo
                .update_message_status(msg.id, MessageStatus::Delivered)
                .await?
        {
            msg.status = MessageStatus::Delivered;
        }
        for member in offline {
            self.push_fallback(&msg, member).await;
        }
        self.hub
            .send_to_user_except(msg.sender_id, origin_conn, &frame)
            .await;
        Ok(msg)
    }

    /// Best-effort: any failure is the gateway's to log, never the sender's.
    async fn push_fallback(&self, msg: &Message, recipient: Uuid) {
        let title = match self.repo.get_user(msg.sender_id).await {
            Ok(Some(user)) => user.display_label().to_owned(),
            Ok(None) => "New message".to_owned(),
            Err(e) => {
                warn!(error = %e, "could not resolve sender for push title");
                "New message".to_owned()
            }
        };
        let data = json!({
            "message_id": msg.id,
            "sender_id": msg.sender_id,
            "group_id": msg.target.group_id(),
        });
        self.push.push(recipient, &title, &preview(msg), data).await;
        Metrics::incr(&self.metrics.pushes_dispatched);
    }

    // -- forwarding --------------------------------------------------------

    pub async fn forward(
        &self,
        actor: Uuid,
        message_id: Uuid,
        targets: ForwardTargets,
        origin_conn: Option<u64>,
    ) -> Result<ForwardOutcome, ChatError> {
        let original = self
            .repo
            .get_message(message_id)
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or(ChatError::NotFound("message"))?;
        if !authz::can_access_message(self.repo.as_ref(), actor, &original).await? {
            return Err(ChatError::forbidden("no access to this message"));
        }

        let label = match self.repo.get_user(original.sender_id).await? {
            Some(user) => user.display_label().to_owned(),
            None => "unknown".to_owned(),
        };

        let mut outcome = ForwardOutcome::default();
        for to in targets.user_ids {
            // Self-forwards and blocked pairs are skipped without error.
            if to == actor || authz::is_blocked(self.repo.as_ref(), actor, to).await? {
                continue;
            }
            let sent = self
                .create_and_deliver(
                    actor,
                    MessageTarget::User(to),
                    original.content.clone(),
                    original.media_id,
                    None,
                    Some(label.clone()),
                    None,
                    origin_conn,
                )
                .await;
            match sent {
                Ok(m) => outcome.messages.push(m),
                Err(error) => outcome.failures.push(ForwardFailure {
                    target: MessageTarget::User(to),
                    error,
                }),
            }
        }
        for group_id in targets.group_ids {
            if !authz::is_group_member(self.repo.as_ref(), actor, group_id).await? {
                outcome.failures.push(ForwardFailure {
                    target: MessageTarget::Group(group_id),
                    error: ChatError::forbidden("not a member of this group"),
                });
                continue;
            }
            let sent = self
                .create_and_deliver(
                    actor,
                    MessageTarget::Group(group_id),
                    original.content.clone(),
                    original.media_id,
                    None,
                    Some(label.clone()),
                    None,
                    origin_conn,
                )
                .await;
            match sent {
                Ok(m) => outcome.messages.push(m),
                Err(error) => outcome.failures.push(ForwardFailure {
                    target: MessageTarget::Group(group_id),
                    error,
                }),
            }
        }
        Ok(outcome)
    }

    // -- reactions ---------------------------------------------------------

    pub async fn react(
        &self,
        actor: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<(), ChatError> {
        if emoji.trim().is_empty() {
            return Err(ChatError::bad_request("emoji must not be empty"));
        }
        let msg = self.accessible_message(actor, message_id).await?;
        self.repo.upsert_reaction(message_id, actor, emoji).await?;
        self.broadcast_reaction(&msg, actor, emoji, ReactionAction::Added)
            .await
    }

    pub async fn unreact(&self, actor: Uuid, message_id: Uuid) -> Result<(), ChatError> {
        let msg = self.accessible_message(actor, message_id).await?;
        let existing = self
            .repo
            .list_reactions(message_id)
            .await?
            .into_iter()
            .find(|r| r.user_id == actor)
            .ok_or(ChatError::NotFound("reaction"))?;
        self.repo.remove_reaction(message_id, actor).await?;
        self.broadcast_reaction(&msg, actor, &existing.emoji, ReactionAction::Removed)
            .await
    }

    async fn broadcast_reaction(
        &self,
        msg: &Message,
        actor: Uuid,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<(), ChatError> {
        let reactions = self
            .repo
            .list_reactions(msg.id)
            .await?
            .into_iter()
            .map(|r| ReactionEntry {
                user_id: r.user_id,
                emoji: r.emoji,
            })
            .collect();
        let event = ServerEvent::Reaction(ReactionBroadcast {
            message_id: msg.id,
            user_id: actor,
            emoji: emoji.to_owned(),
            action,
            reactions,
        });
        let Some(frame) = encode(&event) else {
            return Ok(());
        };
        match msg.target {
            MessageTarget::Group(group_id) => {
                self.hub.send_to_group(group_id, None, &frame).await?;
            }
            MessageTarget::User(recipient) => {
                self.hub.send_to_user(msg.sender_id, &frame).await;
                self.hub.send_to_user(recipient, &frame).await;
            }
        }
        Ok(())
    }

    // -- read receipts -----------------------------------------------------

    /// Marks every accessible message read, then tells the conversation.
    /// Inaccessible or vanished ids are skipped, not errors: clients batch
    /// acks and a stale id is routine.
    pub async fn mark_read(
        &self,
        reader: Uuid,
        message_ids: &[Uuid],
        group_id: Option<Uuid>,
    ) -> Result<(), ChatError> {
        let now = Utc::now();
        let mut group_acked: Vec<Uuid> = Vec::new();
        let mut dm_acked: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for &message_id in message_ids {
            let Some(msg) = self.repo.get_message(message_id).await? else {
                continue;
            };
            if msg.deleted_at.is_some()
                || !authz::can_access_message(self.repo.as_ref(), reader, &msg).await?
            {
                continue;
            }
            self.repo.upsert_read_receipt(message_id, reader, now).await?;
            if msg.sender_id != reader {
                // Forward-only; reaching read without delivered implies it.
                self.repo
                    .update_message_status(message_id, MessageStatus::Read)
                    .await?;
            }
            match msg.target {
                MessageTarget::Group(_) => group_acked.push(message_id),
                MessageTarget::User(_) => {
                    if msg.sender_id != reader {
                        dm_acked.entry(msg.sender_id).or_default().push(message_id);
                    }
                }
            }
        }

        if let Some(group_id) = group_id {
            if !group_acked.is_empty() {
                let event = ServerEvent::MessagesRead(ReadBroadcast {
                    reader_id: reader,
                    message_ids: group_acked,
                    group_id: Some(group_id),
                });
                if let Some(frame) = encode(&event) {
                    self.hub.send_to_group(group_id, Some(reader), &frame).await?;
                }
            }
        }
        for (sender, ids) in dm_acked {
            let event = ServerEvent::MessagesRead(ReadBroadcast {
                reader_id: reader,
                message_ids: ids,
                group_id: None,
            });
            if let Some(frame) = encode(&event) {
                self.hub.send_to_user(sender, &frame).await;
            }
        }
        Ok(())
    }

    // -- typing ------------------------------------------------------------

    /// Ephemeral fan-out, nothing persisted. Unauthorized targets are
    /// dropped silently; a typing indicator is not worth an error frame.
    pub async fn typing(
        &self,
        from: Uuid,
        to: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<(), ChatError> {
        match (to, group_id) {
            (Some(to), None) => {
                if !authz::can_dm(self.repo.as_ref(), from, to).await? {
                    debug!(from = %from, "typing dropped: cannot DM target");
                    return Ok(());
                }
                let event = ServerEvent::Typing(TypingBroadcast {
                    from,
                    group_id: None,
                });
                if let Some(frame) = encode(&event) {
                    self.hub.send_to_user(to, &frame).await;
                }
                Ok(())
            }
            (None, Some(group_id)) => {
                if !authz::is_group_member(self.repo.as_ref(), from, group_id).await? {
                    debug!(from = %from, "typing dropped: not a member");
                    return Ok(());
                }
                let event = ServerEvent::Typing(TypingBroadcast {
                    from,
                    group_id: Some(group_id),
                });
                if let Some(frame) = encode(&event) {
                    self.hub.send_to_group(group_id, Some(from), &frame).await?;
                }
                Ok(())
            }
            _ => Err(ChatError::bad_request(
                "typing needs exactly one of to / group_id",
            )),
        }
    }

    // -- scheduling --------------------------------------------------------

    /// Delivery path for messages the scheduler has just promoted. The
    /// authorization state may have changed since the schedule was created,
    /// so the gate runs again; a now-blocked or now-expelled sender keeps
    /// the row persisted but undelivered.
    pub async fn deliver_scheduled(&self, msg: &Message) -> Result<(), ChatError> {
        let mut msg = msg.clone();
        msg.scheduled_at = None;
        match msg.target {
            MessageTarget::User(to) => {
                if authz::is_blocked(self.repo.as_ref(), msg.sender_id, to).await? {
                    info!(message_id = %msg.id, "scheduled message suppressed: pair now blocked");
                    return Ok(());
                }
            }
            MessageTarget::Group(group_id) => {
                if !authz::is_group_member(self.repo.as_ref(), msg.sender_id, group_id).await? {
                    info!(message_id = %msg.id, "scheduled message suppressed: sender left group");
                    return Ok(());
                }
            }
        }
        self.deliver(msg, None).await?;
        Ok(())
    }

    /// Cancels a not-yet-promoted scheduled message by soft-deleting it.
    pub async fn cancel_scheduled(&self, actor: Uuid, message_id: Uuid) -> Result<(), ChatError> {
        let msg = self
            .repo
            .get_message(message_id)
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or(ChatError::NotFound("message"))?;
        if msg.sender_id != actor {
            return Err(ChatError::forbidden("only the sender may cancel"));
        }
        if msg.scheduled_at.is_none() {
            return Err(ChatError::Conflict("message already delivered".to_owned()));
        }
        if !self.repo.soft_delete_message(message_id, Utc::now()).await? {
            return Err(ChatError::Conflict("message already deleted".to_owned()));
        }
        Ok(())
    }

    // -- history -----------------------------------------------------------

    pub async fn history_dm(
        &self,
        caller: Uuid,
        peer: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, ChatError> {
        Ok(self
            .repo
            .list_history_dm(caller, peer, Utc::now(), limit)
            .await?)
    }

    pub async fn history_group(
        &self,
        caller: Uuid,
        group_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, ChatError> {
        if !authz::is_group_member(self.repo.as_ref(), caller, group_id).await? {
            return Err(ChatError::forbidden("not a member of this group"));
        }
        Ok(self
            .repo
            .list_history_group(group_id, Utc::now(), limit)
            .await?)
    }

    // -- shared helpers ----------------------------------------------------

    async fn accessible_message(
        &self,
        actor: Uuid,
        message_id: Uuid,
    ) -> Result<Message, ChatError> {
        let msg = self
            .repo
            .get_message(message_id)
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or(ChatError::NotFound("message"))?;
        if !authz::can_access_message(self.repo.as_ref(), actor, &msg).await? {
            return Err(ChatError::forbidden("no access to this message"));
        }
        Ok(msg)
    }
}
