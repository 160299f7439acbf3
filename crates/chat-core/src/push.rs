use async_trait::async_trait;
use uuid::Uuid;

/// Offline-notification collaborator. Fire-and-forget: implementations log
/// and absorb provider failures, and drop invalid registrations themselves
/// (via `Repository::delete_token`); the pipeline never sees an error.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(&self, recipient_id: Uuid, title: &str, body: &str, data: serde_json::Value);
}
