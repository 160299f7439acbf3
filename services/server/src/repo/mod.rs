//! Postgres-backed `Repository`. Queries are runtime-checked and map rows by
//! column name; the schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use chat_core::models::{
    Conversation, DeviceToken, GroupRole, Message, MessageStatus, MessageTarget, NewMessage,
    Platform, Reaction, ReadReceipt, User,
};
use chat_core::repo::Repository;
use chat_core::RepoError;

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::backend(e)
}

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, group_id, content, media_id, \
     reply_to_id, forwarded_from, scheduled_at, expires_at, deleted_at, status, created_at, \
     edited_at";

fn message_from_row(row: &PgRow) -> Result<Message, RepoError> {
    let recipient_id: Option<Uuid> = row.get("recipient_id");
    let group_id: Option<Uuid> = row.get("group_id");
    let target = match (recipient_id, group_id) {
        (Some(user_id), None) => MessageTarget::User(user_id),
        (None, Some(group_id)) => MessageTarget::Group(group_id),
        _ => return Err(RepoError::backend("message row violates destination exclusivity")),
    };
    let status_raw: String = row.get("status");
    let status = MessageStatus::parse(&status_raw)
        .ok_or_else(|| RepoError::backend(format!("unknown message status {status_raw:?}")))?;
    Ok(Message {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        target,
        content: row.get("content"),
        media_id: row.get("media_id"),
        reply_to_id: row.get("reply_to_id"),
        forwarded_from: row.get("forwarded_from"),
        scheduled_at: row.get("scheduled_at"),
        expires_at: row.get("expires_at"),
        deleted_at: row.get("deleted_at"),
        status,
        created_at: row.get("created_at"),
        edited_at: row.get("edited_at"),
    })
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_message(&self, new: NewMessage) -> Result<Message, RepoError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO messages
                   (id, sender_id, recipient_id, group_id, content, media_id, reply_to_id,
                    forwarded_from, scheduled_at, expires_at, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'sent', $11)"#,
        )
        .bind(id)
        .bind(new.sender_id)
        .bind(new.target.recipient_id())
        .bind(new.target.group_id())
        .bind(&new.content)
        .bind(new.media_id)
        .bind(new.reply_to_id)
        .bind(&new.forwarded_from)
        .bind(new.scheduled_at)
        .bind(new.expires_at)
        .bind(new.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Message {
            id,
            sender_id: new.sender_id,
            target: new.target,
            content: new.content,
            media_id: new.media_id,
            reply_to_id: new.reply_to_id,
            forwarded_from: new.forwarded_from,
            scheduled_at: new.scheduled_at,
            expires_at: new.expires_at,
            deleted_at: None,
            status: MessageStatus::Sent,
            created_at: new.created_at,
            edited_at: None,
        })
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn update_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> Result<bool, RepoError> {
        // Forward-only, enforced in the same statement so concurrent
        // transitions cannot interleave a regression.
        let result = sqlx::query(
            r#"UPDATE messages SET status = $2
               WHERE id = $1
                 AND array_position(ARRAY['sent','delivered','read']::text[], status)
                     < array_position(ARRAY['sent','delivered','read']::text[], $2)"#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_message(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_history_dm(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE deleted_at IS NULL
                 AND (scheduled_at IS NULL OR scheduled_at <= $3)
                 AND ((sender_id = $1 AND recipient_id = $2)
                      OR (sender_id = $2 AND recipient_id = $1))
               ORDER BY created_at DESC
               LIMIT $4"#
        ))
        .bind(a)
        .bind(b)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn list_history_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE deleted_at IS NULL
                 AND (scheduled_at IS NULL OR scheduled_at <= $2)
                 AND group_id = $1
               ORDER BY created_at DESC
               LIMIT $3"#
        ))
        .bind(group_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO reactions (message_id, user_id, emoji) VALUES ($1, $2, $3)
               ON CONFLICT (message_id, user_id) DO UPDATE SET emoji = EXCLUDED.emoji"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM reactions WHERE message_id = $1 AND user_id = $2")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reactions(&self, message_id: Uuid) -> Result<Vec<Reaction>, RepoError> {
        let rows = sqlx::query(
            "SELECT user_id, emoji FROM reactions WHERE message_id = $1 ORDER BY user_id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|row| Reaction {
                message_id,
                user_id: row.get("user_id"),
                emoji: row.get("emoji"),
            })
            .collect())
    }

    async fn upsert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO read_receipts (message_id, reader_id, read_at) VALUES ($1, $2, $3)
               ON CONFLICT (message_id, reader_id) DO NOTHING"#,
        )
        .bind(message_id)
        .bind(reader_id)
        .bind(read_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>, RepoError> {
        let rows = sqlx::query(
            "SELECT reader_id, read_at FROM read_receipts WHERE message_id = $1 ORDER BY read_at",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|row| ReadReceipt {
                message_id,
                reader_id: row.get("reader_id"),
                read_at: row.get("read_at"),
            })
            .collect())
    }

    async fn get_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupRole>, RepoError> {
        let row = sqlx::query("SELECT role FROM group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let raw: String = row.get("role");
                GroupRole::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| RepoError::backend(format!("unknown group role {raw:?}")))
            }
        }
    }

    async fn list_group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query(
            "SELECT user_id FROM group_members WHERE group_id = $1 ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|row| row.get("user_id")).collect())
    }

    async fn block_exists_either_way(&self, a: Uuid, b: Uuid) -> Result<bool, RepoError> {
        let row = sqlx::query(
            r#"SELECT EXISTS(
                   SELECT 1 FROM blocks
                   WHERE (blocker_id = $1 AND blocked_id = $2)
                      OR (blocker_id = $2 AND blocked_id = $1)
               ) AS blocked"#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get("blocked"))
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE scheduled_at IS NOT NULL
                 AND scheduled_at <= $1
                 AND status = 'sent'
                 AND deleted_at IS NULL
               ORDER BY scheduled_at ASC
               LIMIT $2"#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn clear_scheduled_guarded(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"UPDATE messages SET scheduled_at = NULL
               WHERE id = $1
                 AND scheduled_at IS NOT NULL
                 AND scheduled_at <= $2
                 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query(
            r#"SELECT id FROM messages
               WHERE expires_at IS NOT NULL AND expires_at < $1 AND deleted_at IS NULL
               ORDER BY expires_at ASC
               LIMIT $2"#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query("SELECT id, username, display_name, last_seen FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            display_name: row.get("display_name"),
            last_seen: row.get("last_seen"),
        }))
    }

    async fn get_user_tokens(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, RepoError> {
        let rows = sqlx::query(
            "SELECT token, platform, last_seen FROM device_tokens WHERE user_id = $1 ORDER BY token",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                let raw: String = row.get("platform");
                let platform = Platform::parse(&raw)
                    .ok_or_else(|| RepoError::backend(format!("unknown platform {raw:?}")))?;
                Ok(DeviceToken {
                    user_id,
                    token: row.get("token"),
                    platform,
                    last_seen: row.get("last_seen"),
                })
            })
            .collect()
    }

    async fn delete_token(&self, token: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM device_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn disappearing_timer(&self, conversation: Conversation) -> Result<u32, RepoError> {
        let row = match conversation.canonical() {
            Conversation::Dm(a, b) => {
                sqlx::query(
                    r#"SELECT disappearing_seconds FROM conversation_settings
                       WHERE dm_user_a = $1 AND dm_user_b = $2"#,
                )
                .bind(a)
                .bind(b)
                .fetch_optional(&self.pool)
                .await
            }
            Conversation::Group(group_id) => {
                sqlx::query(
                    "SELECT disappearing_seconds FROM conversation_settings WHERE group_id = $1",
                )
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;
        Ok(row
            .map(|row| {
                let seconds: i32 = row.get("disappearing_seconds");
                u32::try_from(seconds).unwrap_or(0)
            })
            .unwrap_or(0))
    }

    async fn media_approved(&self, media_id: Uuid) -> Result<bool, RepoError> {
        let row = sqlx::query(
            r#"SELECT EXISTS(
                   SELECT 1 FROM media WHERE id = $1 AND moderation_status = 'approved'
               ) AS approved"#,
        )
        .bind(media_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get("approved"))
    }

    async fn touch_last_seen(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), RepoError> {
        sqlx::query("UPDATE users SET last_seen = $2 WHERE id = $1")
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
