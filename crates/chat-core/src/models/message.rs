use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Delivery status. The ordering is load-bearing: transitions may only move
/// forward (`Sent < Delivered < Read`), and skipping `Delivered` is allowed
/// (reaching `Read` implies delivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    /// True when moving from `self` to `next` is a forward transition.
    #[must_use]
    pub fn advances_to(self, next: Self) -> bool {
        next > self
    }
}

/// Destination of a message: exactly one recipient user or one group.
/// Storing the target as an enum makes the recipient-XOR-group rule a
/// construction guarantee instead of a runtime check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    User(Uuid),
    Group(Uuid),
}

impl MessageTarget {
    #[must_use]
    pub fn recipient_id(self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(id),
            Self::Group(_) => None,
        }
    }

    #[must_use]
    pub fn group_id(self) -> Option<Uuid> {
        match self {
            Self::User(_) => None,
            Self::Group(id) => Some(id),
        }
    }
}

/// A conversation as the unit that carries settings (disappearing timer).
/// DM conversations are unordered user pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversation {
    Dm(Uuid, Uuid),
    Group(Uuid),
}

impl Conversation {
    /// Canonical form so `Dm(a, b)` and `Dm(b, a)` address the same settings.
    #[must_use]
    pub fn canonical(self) -> Self {
        match self {
            Self::Dm(a, b) if b < a => Self::Dm(b, a),
            other => other,
        }
    }
}

/// The allowed per-conversation disappearing timers: off, 24 h, 7 d, 90 d.
#[must_use]
pub fn valid_disappearing_seconds(seconds: u32) -> bool {
    matches!(seconds, 0 | 86_400 | 604_800 | 7_776_000)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub target: MessageTarget,
    pub content: Option<String>,
    pub media_id: Option<Uuid>,
    pub reply_to_id: Option<Uuid>,
    /// Display label of the original sender for forwarded messages.
    pub forwarded_from: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Deliverable now: not soft-deleted and not still waiting on a schedule.
    #[must_use]
    pub fn deliverable_at(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.scheduled_at.is_none_or(|at| at <= now)
    }
}

/// Input to `Repository::create_message`. The repository assigns the id and
/// stores `status = sent`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub target: MessageTarget,
    pub content: Option<String>,
    pub media_id: Option<Uuid>,
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// At most one reaction per (message, user); a second upsert replaces the
/// emoji rather than adding a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub reader_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(target: MessageTarget) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            target,
            content: Some("hi".to_owned()),
            media_id: None,
            reply_to_id: None,
            forwarded_from: None,
            scheduled_at: None,
            expires_at: None,
            deleted_at: None,
            status: MessageStatus::Sent,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            edited_at: None,
        }
    }

    #[test]
    fn target_is_exclusive_by_construction() {
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();

        let dm = MessageTarget::User(user);
        assert_eq!(dm.recipient_id(), Some(user));
        assert_eq!(dm.group_id(), None);

        let grp = MessageTarget::Group(group);
        assert_eq!(grp.recipient_id(), None);
        assert_eq!(grp.group_id(), Some(group));
    }

    #[test]
    fn status_only_advances_forward() {
        use MessageStatus::{Delivered, Read, Sent};
        assert!(Sent.advances_to(Delivered));
        assert!(Sent.advances_to(Read));
        assert!(Delivered.advances_to(Read));
        assert!(!Delivered.advances_to(Sent));
        assert!(!Read.advances_to(Delivered));
        assert!(!Read.advances_to(Read));
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::parse("queued"), None);
    }

    #[test]
    fn dm_conversations_are_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(
            Conversation::Dm(a, b).canonical(),
            Conversation::Dm(b, a).canonical()
        );
    }

    #[test]
    fn scheduled_and_deleted_messages_are_not_deliverable() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut m = message(MessageTarget::User(Uuid::new_v4()));
        assert!(m.deliverable_at(now));

        m.scheduled_at = Some(now + chrono::Duration::seconds(60));
        assert!(!m.deliverable_at(now));
        assert!(m.deliverable_at(now + chrono::Duration::seconds(60)));

        m.scheduled_at = None;
        m.deleted_at = Some(now);
        assert!(!m.deliverable_at(now + chrono::Duration::days(1)));
    }

    #[test]
    fn disappearing_choices_are_closed() {
        assert!(valid_disappearing_seconds(0));
        assert!(valid_disappearing_seconds(86_400));
        assert!(valid_disappearing_seconds(604_800));
        assert!(valid_disappearing_seconds(7_776_000));
        assert!(!valid_disappearing_seconds(3600));
    }
}
