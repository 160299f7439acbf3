//! One live client session: a read pump, a write pump, and the bounded
//! outbound queue between the hub and the socket.
//!
//! Exactly one task reads the socket and exactly one writes it. The queue is
//! the only shared state; everything else is pump-local. The session walks
//! `Registering -> Live -> Closing -> Closed` and never moves backward.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chat_core::ChatError;
use chat_protocol::{error_codes, ClientEvent, ErrorMessage, MessageSend, ServerEvent};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::auth::AuthUser;
use crate::pipeline::SendInput;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Registering,
    Live,
    Closing,
    Closed,
}

impl ConnState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Registering,
            1 => Self::Live,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

struct Connection {
    state: AppState,
    user: AuthUser,
    conn_id: u64,
    /// Clone of the hub-side sender, for self-directed frames (pong, errors).
    frames: mpsc::Sender<Message>,
    lifecycle: AtomicU8,
    last_pong_ms: AtomicI64,
    last_activity_ms: AtomicI64,
}

impl Connection {
    fn lifecycle(&self) -> ConnState {
        ConnState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Forward-only; a later state never regresses to an earlier one.
    fn advance(&self, next: ConnState) {
        self.lifecycle.fetch_max(next as u8, Ordering::AcqRel);
    }

    fn touch_activity(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn touch_pong(&self) {
        self.last_pong_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Self-directed frames ride the same queue as fan-out so the single
    /// writer invariant holds. If the queue is full the frame is dropped;
    /// the hub will evict this connection on its next enqueue anyway.
    fn enqueue(&self, event: &ServerEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = self.frames.try_send(Message::Text(json));
        }
    }

    fn enqueue_error(&self, code: &str, message: &str, retryable: bool) {
        self.enqueue(&ServerEvent::Error(ErrorMessage {
            code: code.to_owned(),
            message: message.to_owned(),
            retryable,
        }));
    }

    async fn read_pump(&self, stream: &mut SplitStream<WebSocket>, read_deadline: Duration) {
        let mut deadline = tokio::time::Instant::now() + read_deadline;
        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    let now_ms = Utc::now().timestamp_millis();
                    warn!(
                        user_id = %self.user.id,
                        conn_id = self.conn_id,
                        ms_since_pong = now_ms - self.last_pong_ms.load(Ordering::Relaxed),
                        ms_since_activity = now_ms - self.last_activity_ms.load(Ordering::Relaxed),
                        "read deadline expired"
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(user_id = %self.user.id, conn_id = self.conn_id, error = %e, "socket read failed");
                    break;
                }
                Ok(Some(Ok(Message::Pong(_)))) => {
                    self.touch_pong();
                    deadline = tokio::time::Instant::now() + read_deadline;
                }
                Ok(Some(Ok(Message::Ping(data)))) => {
                    let _ = self.frames.try_send(Message::Pong(data));
                }
                Ok(Some(Ok(Message::Close(_)))) => {
                    debug!(user_id = %self.user.id, conn_id = self.conn_id, "client closed");
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.touch_activity();
                    if !self.handle_frame(&text).await {
                        break;
                    }
                }
                Ok(Some(Ok(Message::Binary(_)))) => {
                    warn!(user_id = %self.user.id, "binary frames are not part of the protocol");
                }
            }
        }
    }

    /// Dispatches one inbound envelope. Returns false only for terminal
    /// (transport) failures; protocol-level rejections answer with a typed
    /// error frame and keep the session live.
    async fn handle_frame(&self, text: &str) -> bool {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(user_id = %self.user.id, error = %e, "undecodable frame");
                self.enqueue_error(error_codes::PROTOCOL_ERROR, "invalid JSON envelope", false);
                return true;
            }
        };

        let result = match event {
            ClientEvent::Message(send) => self.handle_message(send).await,
            ClientEvent::Typing(typing) => {
                self.state
                    .pipeline
                    .typing(self.user.id, typing.to, typing.group_id)
                    .await
            }
            ClientEvent::Read(read) => {
                self.state
                    .pipeline
                    .mark_read(self.user.id, &read.message_ids, read.group_id)
                    .await
            }
            ClientEvent::Ping => {
                self.enqueue(&ServerEvent::Pong);
                Ok(())
            }
            ClientEvent::Unknown => {
                warn!(user_id = %self.user.id, "ignoring unknown frame kind");
                Ok(())
            }
        };

        match result {
            Ok(()) => true,
            Err(ChatError::Transport(e)) => {
                warn!(user_id = %self.user.id, error = %e, "transport failure");
                false
            }
            Err(err) => {
                debug!(user_id = %self.user.id, error = %err, "rejected frame");
                self.enqueue_error(err.code(), &err.to_string(), err.retryable());
                true
            }
        }
    }

    async fn handle_message(&self, send: MessageSend) -> Result<(), ChatError> {
        let input = SendInput {
            content: send.content,
            media_id: send.media_id,
            reply_to: send.reply_to,
            scheduled_at: None,
            origin_conn: Some(self.conn_id),
        };
        match (send.to, send.group_id) {
            (Some(to), None) => {
                self.state.pipeline.send_dm(self.user.id, to, input).await?;
            }
            (None, Some(group_id)) => {
                self.state
                    .pipeline
                    .send_group(self.user.id, group_id, input)
                    .await?;
            }
            _ => {
                return Err(ChatError::bad_request(
                    "message needs exactly one of to / group_id",
                ))
            }
        }
        Ok(())
    }
}

/// Runs a session to completion: register, pump, deregister, drain.
pub async fn run(socket: WebSocket, state: AppState, user: AuthUser) {
    let queue_capacity = state.config.outbound_queue;
    let (frame_tx, frame_rx) = mpsc::channel::<Message>(queue_capacity);
    let (close_tx, close_rx) = watch::channel(false);

    let conn_id = state
        .hub
        .register(user.id, frame_tx.clone(), close_tx)
        .await;
    let conn = Connection {
        user: user.clone(),
        conn_id,
        frames: frame_tx,
        lifecycle: AtomicU8::new(ConnState::Registering as u8),
        last_pong_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        state,
    };
    conn.advance(ConnState::Live);
    info!(user_id = %user.id, username = %user.username, conn_id, "client connected");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_pump(
        sink,
        frame_rx,
        close_rx,
        conn.state.config.write_deadline,
        conn.state.config.ping_period,
    ));

    conn.read_pump(&mut stream, conn.state.config.read_deadline)
        .await;

    conn.advance(ConnState::Closing);
    // Dropping the registry handle ends the writer's close watch, so the
    // write pump flushes and returns; this task owns the last frame sender.
    conn.state.hub.unregister(user.id, conn_id).await;
    let _ = writer.await;
    conn.advance(ConnState::Closed);
    info!(user_id = %user.id, conn_id, state = ?conn.lifecycle(), "connection closed");
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_deadline: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(write_deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "socket write failed");
            Err(())
        }
        Err(_) => {
            warn!("write deadline expired");
            Err(())
        }
    }
}

/// Best-effort flush of whatever is already queued, used on the close path.
async fn drain(
    sink: &mut SplitSink<WebSocket, Message>,
    frames: &mut mpsc::Receiver<Message>,
    write_deadline: Duration,
) {
    while let Ok(frame) = frames.try_recv() {
        if write_frame(sink, frame, write_deadline).await.is_err() {
            return;
        }
    }
}

/// The single writer. Pings and fan-out frames share this task; nothing else
/// ever writes to the socket.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Message>,
    mut close: watch::Receiver<bool>,
    write_deadline: Duration,
    ping_period: Duration,
) {
    let mut ping = tokio::time::interval(ping_period);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = close.changed() => {
                match changed {
                    Ok(()) if *close.borrow() => {
                        drain(&mut sink, &mut frames, write_deadline).await;
                        break;
                    }
                    Ok(()) => {}
                    // Registry handle gone (eviction already drained the map
                    // entry); flush and exit.
                    Err(_) => {
                        drain(&mut sink, &mut frames, write_deadline).await;
                        break;
                    }
                }
            }
            maybe = frames.recv() => {
                match maybe {
                    Some(frame) => {
                        if write_frame(&mut sink, frame, write_deadline).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if write_frame(&mut sink, Message::Ping(Vec::new()), write_deadline).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = tokio::time::timeout(write_deadline, sink.send(Message::Close(None))).await;
}
