//! Stateless authorization predicates, consulted at every pipeline entry.

use chat_core::models::{Message, MessageTarget};
use chat_core::repo::Repository;
use chat_core::RepoError;
use uuid::Uuid;

/// A block in either direction suppresses all direct traffic.
pub async fn is_blocked(repo: &dyn Repository, a: Uuid, b: Uuid) -> Result<bool, RepoError> {
    repo.block_exists_either_way(a, b).await
}

pub async fn can_dm(repo: &dyn Repository, from: Uuid, to: Uuid) -> Result<bool, RepoError> {
    if from == to {
        return Ok(false);
    }
    Ok(!is_blocked(repo, from, to).await?)
}

pub async fn is_group_member(
    repo: &dyn Repository,
    user_id: Uuid,
    group_id: Uuid,
) -> Result<bool, RepoError> {
    Ok(repo.get_membership(group_id, user_id).await?.is_some())
}

/// Sender, DM recipient, and group members may see a message.
pub async fn can_access_message(
    repo: &dyn Repository,
    user_id: Uuid,
    message: &Message,
) -> Result<bool, RepoError> {
    if message.sender_id == user_id {
        return Ok(true);
    }
    match message.target {
        MessageTarget::User(recipient) => Ok(recipient == user_id),
        MessageTarget::Group(group_id) => is_group_member(repo, user_id, group_id).await,
    }
}
