//! Push gateway implementations.
//!
//! The relay speaks a minimal provider-agnostic POST; the actual FCM/APNs
//! wire formats live behind the relay endpoint. Everything here is
//! fire-and-forget: failures are logged, invalid registrations are dropped,
//! and nothing propagates to the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::push::PushGateway;
use chat_core::repo::Repository;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ProviderPush {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    repo: Arc<dyn Repository>,
}

impl ProviderPush {
    pub fn new(endpoint: String, api_key: Option<String>, repo: Arc<dyn Repository>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            repo,
        }
    }
}

#[async_trait]
impl PushGateway for ProviderPush {
    async fn push(&self, recipient_id: Uuid, title: &str, body: &str, data: serde_json::Value) {
        let tokens = match self.repo.get_user_tokens(recipient_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(recipient_id = %recipient_id, error = %e, "push skipped: token lookup failed");
                return;
            }
        };
        if tokens.is_empty() {
            debug!(recipient_id = %recipient_id, "push skipped: no registered devices");
            return;
        }

        for device in tokens {
            let payload = json!({
                "token": device.token,
                "platform": device.platform.as_str(),
                "notification": { "title": title, "body": body },
                "data": data,
            });
            let mut request = self.client.post(&self.endpoint).json(&payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            match request.send().await {
                Ok(response)
                    if response.status() == StatusCode::NOT_FOUND
                        || response.status() == StatusCode::GONE =>
                {
                    // Provider says the registration is dead; forget it.
                    debug!(recipient_id = %recipient_id, "dropping invalid device token");
                    if let Err(e) = self.repo.delete_token(&device.token).await {
                        warn!(error = %e, "failed to delete invalid token");
                    }
                }
                Ok(response) if !response.status().is_success() => {
                    warn!(
                        recipient_id = %recipient_id,
                        status = %response.status(),
                        "push provider rejected notification"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(recipient_id = %recipient_id, error = %e, "push provider unreachable");
                }
            }
        }
    }
}

/// Used when no `PUSH_ENDPOINT` is configured; offline recipients simply
/// wait for their next history fetch.
pub struct NoopPush;

#[async_trait]
impl PushGateway for NoopPush {
    async fn push(&self, recipient_id: Uuid, _title: &str, _body: &str, _data: serde_json::Value) {
        debug!(recipient_id = %recipient_id, "push gateway disabled, notification dropped");
    }
}
