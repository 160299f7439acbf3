use std::sync::Mutex;

use async_trait::async_trait;
use chat_core::push::PushGateway;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Captures every notification instead of talking to a provider.
#[derive(Debug, Default)]
pub struct RecordingPush {
    pushes: Mutex<Vec<RecordedPush>>,
}

impl RecordingPush {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn take(&self) -> Vec<RecordedPush> {
        std::mem::take(&mut self.pushes.lock().unwrap())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn push(&self, recipient_id: Uuid, title: &str, body: &str, data: serde_json::Value) {
        self.pushes.lock().unwrap().push(RecordedPush {
            recipient_id,
            title: title.to_owned(),
            body: body.to_owned(),
            data,
        });
    }
}
