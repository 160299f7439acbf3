use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Account record. Created by the auth collaborator; the core only reads it
/// and maintains `last_seen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    /// Name to show other users (push titles, `forwarded_from` labels).
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ios" => Some(Self::Ios),
            "android" => Some(Self::Android),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

/// Push registration. `token` is globally unique; the platform picks the
/// provider route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
    pub user_id: Uuid,
    pub token: String,
    pub platform: Platform,
    pub last_seen: Option<DateTime<Utc>>,
}
