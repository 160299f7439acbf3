//! Shared fixtures: an AppState over the in-memory repository, plus fake
//! registered connections whose queues the tests hold directly.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chat_protocol::ServerEvent;
use chat_test_utils::{MemoryRepository, RecordingPush};
use server::config::Config;
use server::AppState;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub struct TestEnv {
    pub state: AppState,
    pub repo: Arc<MemoryRepository>,
    pub push: Arc<RecordingPush>,
}

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused".to_owned()),
        "JWT_SECRET" => Some("test-secret".to_owned()),
        _ => None,
    })
    .expect("test config should parse")
}

pub fn env() -> TestEnv {
    let repo = Arc::new(MemoryRepository::new());
    let push = Arc::new(RecordingPush::new());
    let state = AppState::new(repo.clone(), push.clone(), test_config());
    TestEnv { state, repo, push }
}

/// A hub-registered connection without a socket: the test plays the write
/// pump by reading `frames` directly.
pub struct TestConn {
    pub conn_id: u64,
    pub frames: mpsc::Receiver<Message>,
    pub close: watch::Receiver<bool>,
}

impl TestConn {
    pub fn closed(&self) -> bool {
        *self.close.borrow()
    }

    /// Drains everything currently queued.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            events.push(decode(&frame));
        }
        events
    }

    pub async fn next_event(&mut self) -> ServerEvent {
        let frame = tokio::time::timeout(Duration::from_secs(1), self.frames.recv())
            .await
            .expect("expected a frame within 1s")
            .expect("frame channel closed");
        decode(&frame)
    }
}

pub async fn attach(state: &AppState, user_id: Uuid) -> TestConn {
    attach_with_capacity(state, user_id, state.config.outbound_queue).await
}

pub async fn attach_with_capacity(state: &AppState, user_id: Uuid, capacity: usize) -> TestConn {
    let (tx, rx) = mpsc::channel(capacity);
    let (close_tx, close_rx) = watch::channel(false);
    let conn_id = state.hub.register(user_id, tx, close_tx).await;
    TestConn {
        conn_id,
        frames: rx,
        close: close_rx,
    }
}

pub fn decode(frame: &Message) -> ServerEvent {
    match frame {
        Message::Text(text) => serde_json::from_str(text).expect("valid outbound envelope"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}
