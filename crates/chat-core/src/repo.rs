use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::{
    Conversation, DeviceToken, GroupRole, Message, MessageStatus, NewMessage, Reaction,
    ReadReceipt, User,
};

/// The persistence contract the core consumes. Each operation is
/// individually atomic; no operation spans a transaction boundary visible to
/// callers.
///
/// Time flows in as a parameter wherever the predicate depends on "now"
/// (due-scheduled, expiry, guarded clears) so background loops are
/// deterministic under test.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- messages ----------------------------------------------------------

    async fn create_message(&self, new: NewMessage) -> Result<Message, RepoError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, RepoError>;

    /// Forward-only status update; returns false when the stored status is
    /// already at or past `status` (never an error, transitions race).
    async fn update_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> Result<bool, RepoError>;

    /// Soft delete. Returns false when the row was already deleted or absent.
    async fn soft_delete_message(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError>;

    /// DM history between two users, newest first. Excludes soft-deleted
    /// rows and rows still scheduled in the future.
    async fn list_history_dm(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError>;

    async fn list_history_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError>;

    // -- reactions and receipts -------------------------------------------

    /// Insert or replace the single reaction for (message, user).
    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), RepoError>;

    /// Returns false when no reaction existed.
    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<bool, RepoError>;

    async fn list_reactions(&self, message_id: Uuid) -> Result<Vec<Reaction>, RepoError>;

    /// Idempotent insert; returns true only on first insertion.
    async fn upsert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    async fn list_read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>, RepoError>;

    // -- memberships and blocks -------------------------------------------

    async fn get_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupRole>, RepoError>;

    async fn list_group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, RepoError>;

    /// True when a block exists in either direction between `a` and `b`.
    async fn block_exists_either_way(&self, a: Uuid, b: Uuid) -> Result<bool, RepoError>;

    // -- scheduling and expiry --------------------------------------------

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError>;

    /// Atomically clear `scheduled_at` gated on
    /// `scheduled_at IS NOT NULL AND scheduled_at <= now AND deleted_at IS NULL`.
    /// Returns true only for the caller that won the clear, so overlapping
    /// scheduler ticks cannot both deliver.
    async fn clear_scheduled_guarded(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    /// Ids of live messages with `expires_at < now`.
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, RepoError>;

    // -- users, tokens, conversation settings -----------------------------

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError>;

    async fn get_user_tokens(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, RepoError>;

    async fn delete_token(&self, token: &str) -> Result<(), RepoError>;

    /// Disappearing timer in seconds for the conversation; 0 means off.
    async fn disappearing_timer(&self, conversation: Conversation) -> Result<u32, RepoError>;

    async fn media_approved(&self, media_id: Uuid) -> Result<bool, RepoError>;

    async fn touch_last_seen(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), RepoError>;
}
