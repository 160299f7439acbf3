use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use chat_core::models::{
    Conversation, DeviceToken, GroupRole, Message, MessageStatus, NewMessage, Platform, Reaction,
    ReadReceipt, User,
};
use chat_core::repo::Repository;
use chat_core::RepoError;

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, User>,
    messages: HashMap<Uuid, Message>,
    /// Creation order, for stable history sorting on equal timestamps.
    message_order: Vec<Uuid>,
    reactions: HashMap<Uuid, BTreeMap<Uuid, String>>,
    receipts: HashMap<Uuid, BTreeMap<Uuid, DateTime<Utc>>>,
    memberships: HashMap<Uuid, BTreeMap<Uuid, GroupRole>>,
    blocks: HashSet<(Uuid, Uuid)>,
    tokens: BTreeMap<String, DeviceToken>,
    timers: HashMap<Conversation, u32>,
    approved_media: HashSet<Uuid>,
    fail_remaining: u32,
}

/// In-memory `Repository`. All operations take one lock, so each is atomic
/// exactly like the contract requires.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding helpers (not part of the Repository contract) ------------

    pub fn add_user(&self, username: &str, display_name: Option<&str>) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            display_name: display_name.map(ToOwned::to_owned),
            last_seen: None,
        };
        let id = user.id;
        self.store.lock().unwrap().users.insert(id, user);
        id
    }

    /// Creates a group with the first user as owner, the rest as members.
    pub fn add_group(&self, users: &[Uuid]) -> Uuid {
        let group_id = Uuid::new_v4();
        let mut store = self.store.lock().unwrap();
        let members = store.memberships.entry(group_id).or_default();
        for (i, user_id) in users.iter().enumerate() {
            let role = if i == 0 {
                GroupRole::Owner
            } else {
                GroupRole::Member
            };
            members.insert(*user_id, role);
        }
        group_id
    }

    pub fn add_block(&self, blocker: Uuid, blocked: Uuid) {
        self.store.lock().unwrap().blocks.insert((blocker, blocked));
    }

    pub fn remove_block(&self, blocker: Uuid, blocked: Uuid) {
        self.store.lock().unwrap().blocks.remove(&(blocker, blocked));
    }

    pub fn add_token(&self, user_id: Uuid, token: &str, platform: Platform) {
        self.store.lock().unwrap().tokens.insert(
            token.to_owned(),
            DeviceToken {
                user_id,
                token: token.to_owned(),
                platform,
                last_seen: None,
            },
        );
    }

    pub fn set_disappearing(&self, conversation: Conversation, seconds: u32) {
        self.store
            .lock()
            .unwrap()
            .timers
            .insert(conversation.canonical(), seconds);
    }

    pub fn approve_media(&self, media_id: Uuid) {
        self.store.lock().unwrap().approved_media.insert(media_id);
    }

    /// Makes the next `n` repository operations fail with a backend error.
    pub fn inject_failures(&self, n: u32) {
        self.store.lock().unwrap().fail_remaining = n;
    }

    /// Direct synchronous read for assertions.
    #[must_use]
    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.store.lock().unwrap().messages.get(&id).cloned()
    }

    #[must_use]
    pub fn user(&self, id: Uuid) -> Option<User> {
        self.store.lock().unwrap().users.get(&id).cloned()
    }

    fn check_fault(store: &mut Store) -> Result<(), RepoError> {
        if store.fail_remaining > 0 {
            store.fail_remaining -= 1;
            return Err(RepoError::backend("injected failure"));
        }
        Ok(())
    }
}

fn dm_pair(m: &Message) -> Option<(Uuid, Uuid)> {
    m.target.recipient_id().map(|to| (m.sender_id, to))
}

fn visible_at(m: &Message, now: DateTime<Utc>) -> bool {
    m.deleted_at.is_none() && m.scheduled_at.map_or(true, |at| at <= now)
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_message(&self, new: NewMessage) -> Result<Message, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let message = Message {
            id: Uuid::new_v4(),
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
        };
        store.message_order.push(message.id);
        store.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store.messages.get(&id).cloned())
    }

    async fn update_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        match store.messages.get_mut(&id) {
            Some(m) if m.status.advances_to(status) => {
                m.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_message(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        match store.messages.get_mut(&id) {
            Some(m) if m.deleted_at.is_none() => {
                m.deleted_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_history_dm(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let mut rows: Vec<Message> = store
            .message_order
            .iter()
            .rev()
            .filter_map(|id| store.messages.get(id))
            .filter(|m| {
                visible_at(m, now)
                    && dm_pair(m).is_some_and(|(from, to)| {
                        (from == a && to == b) || (from == b && to == a)
                    })
            })
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        rows.sort_by(|x, y| y.created_at.cmp(&x.created_at));
        Ok(rows)
    }

    async fn list_history_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let mut rows: Vec<Message> = store
            .message_order
            .iter()
            .rev()
            .filter_map(|id| store.messages.get(id))
            .filter(|m| visible_at(m, now) && m.target.group_id() == Some(group_id))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        rows.sort_by(|x, y| y.created_at.cmp(&x.created_at));
        Ok(rows)
    }

    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        store
            .reactions
            .entry(message_id)
            .or_default()
            .insert(user_id, emoji.to_owned());
        Ok(())
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .reactions
            .get_mut(&message_id)
            .is_some_and(|per_user| per_user.remove(&user_id).is_some()))
    }

    async fn list_reactions(&self, message_id: Uuid) -> Result<Vec<Reaction>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .reactions
            .get(&message_id)
            .map(|per_user| {
                per_user
                    .iter()
                    .map(|(user_id, emoji)| Reaction {
                        message_id,
                        user_id: *user_id,
                        emoji: emoji.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let receipts = store.receipts.entry(message_id).or_default();
        if receipts.contains_key(&reader_id) {
            return Ok(false);
        }
        receipts.insert(reader_id, read_at);
        Ok(true)
    }

    async fn list_read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .receipts
            .get(&message_id)
            .map(|per_reader| {
                per_reader
                    .iter()
                    .map(|(reader_id, read_at)| ReadReceipt {
                        message_id,
                        reader_id: *reader_id,
                        read_at: *read_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupRole>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .memberships
            .get(&group_id)
            .and_then(|members| members.get(&user_id).copied()))
    }

    async fn list_group_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .memberships
            .get(&group_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn block_exists_either_way(&self, a: Uuid, b: Uuid) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store.blocks.contains(&(a, b)) || store.blocks.contains(&(b, a)))
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let mut due: Vec<Message> = store
            .messages
            .values()
            .filter(|m| {
                m.scheduled_at.is_some_and(|at| at <= now)
                    && m.status == MessageStatus::Sent
                    && m.deleted_at.is_none()
            })
            .cloned()
            .collect();
        due.sort_by_key(|m| m.scheduled_at);
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn clear_scheduled_guarded(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        match store.messages.get_mut(&id) {
            Some(m)
                if m.scheduled_at.is_some_and(|at| at <= now) && m.deleted_at.is_none() =>
            {
                m.scheduled_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = store
            .messages
            .values()
            .filter(|m| m.deleted_at.is_none() && m.expires_at.is_some_and(|at| at < now))
            .map(|m| (m.expires_at.unwrap_or(now), m.id))
            .collect();
        expired.sort();
        Ok(expired
            .into_iter()
            .map(|(_, id)| id)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store.users.get(&id).cloned())
    }

    async fn get_user_tokens(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, token: &str) -> Result<(), RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        store.tokens.remove(token);
        Ok(())
    }

    async fn disappearing_timer(&self, conversation: Conversation) -> Result<u32, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store
            .timers
            .get(&conversation.canonical())
            .copied()
            .unwrap_or(0))
    }

    async fn media_approved(&self, media_id: Uuid) -> Result<bool, RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        Ok(store.approved_media.contains(&media_id))
    }

    async fn touch_last_seen(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), RepoError> {
        let mut store = self.store.lock().unwrap();
        Self::check_fault(&mut store)?;
        if let Some(user) = store.users.get_mut(&user_id) {
            user.last_seen = Some(now);
        }
        Ok(())
    }
}
