//! Process-wide registry of live connections, keyed by user.
//!
//! The registry is a `user_id -> {conn_id -> handle}` map behind one RwLock:
//! register/unregister and every send are atomic with respect to each other,
//! so a frame broadcast after `register` returns is guaranteed to reach the
//! new connection's queue (or evict it as slow).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chat_core::repo::Repository;
use chat_core::RepoError;
use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

/// The hub-side view of one connection: the bounded frame queue plus the
/// close signal used for eviction and shutdown.
#[derive(Debug, Clone)]
struct ConnectionHandle {
    frames: mpsc::Sender<Message>,
    close: watch::Sender<bool>,
}

pub struct Hub {
    connections: RwLock<HashMap<Uuid, HashMap<u64, ConnectionHandle>>>,
    repo: Arc<dyn Repository>,
    metrics: Arc<Metrics>,
    next_conn_id: AtomicU64,
}

impl Hub {
    pub fn new(repo: Arc<dyn Repository>, metrics: Arc<Metrics>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            repo,
            metrics,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection's queue and close signal, returning its id.
    /// A user may hold any number of concurrent connections (multi-device).
    pub async fn register(
        &self,
        user_id: Uuid,
        frames: mpsc::Sender<Message>,
        close: watch::Sender<bool>,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().await;
        connections
            .entry(user_id)
            .or_default()
            .insert(conn_id, ConnectionHandle { frames, close });
        debug!(user_id = %user_id, conn_id, "connection registered");
        conn_id
    }

    /// Removes one connection. Idempotent; the last connection out flips the
    /// user offline and stamps `last_seen`.
    pub async fn unregister(&self, user_id: Uuid, conn_id: u64) {
        let went_offline = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&user_id) {
                Some(per_user) => {
                    per_user.remove(&conn_id);
                    if per_user.is_empty() {
                        connections.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if went_offline {
            debug!(user_id = %user_id, "user offline");
            if let Err(e) = self.repo.touch_last_seen(user_id, Utc::now()).await {
                warn!(user_id = %user_id, error = %e, "failed to stamp last_seen");
            }
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn active_connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Enqueues `frame` on every connection of `user_id`. Returns true when
    /// at least one queue accepted it. A full queue marks that connection
    /// slow and evicts it without blocking the caller.
    pub async fn send_to_user(&self, user_id: Uuid, frame: &Message) -> bool {
        self.send_to_user_except(user_id, None, frame).await
    }

    /// `send_to_user`, excluding one connection (the origin of a multi-device
    /// echo).
    pub async fn send_to_user_except(
        &self,
        user_id: Uuid,
        exclude_conn: Option<u64>,
        frame: &Message,
    ) -> bool {
        let handles: Vec<(u64, ConnectionHandle)> = {
            let connections = self.connections.read().await;
            match connections.get(&user_id) {
                Some(per_user) => per_user
                    .iter()
                    .filter(|(conn_id, _)| Some(**conn_id) != exclude_conn)
                    .map(|(conn_id, handle)| (*conn_id, handle.clone()))
                    .collect(),
                None => return false,
            }
        };

        let mut delivered = false;
        let mut slow: Vec<u64> = Vec::new();
        let mut stale: Vec<u64> = Vec::new();
        for (conn_id, handle) in handles {
            match handle.frames.try_send(frame.clone()) {
                Ok(()) => {
                    Metrics::incr(&self.metrics.frames_enqueued);
                    delivered = true;
                }
                Err(TrySendError::Full(_)) => slow.push(conn_id),
                Err(TrySendError::Closed(_)) => stale.push(conn_id),
            }
        }

        for conn_id in slow {
            Metrics::incr(&self.metrics.slow_evictions);
            warn!(user_id = %user_id, conn_id, "outbound queue full, evicting slow consumer");
            self.evict(user_id, conn_id).await;
        }
        for conn_id in stale {
            self.evict(user_id, conn_id).await;
        }
        delivered
    }

    /// Fans `frame` out to every member of the group except `exclude_user`.
    /// Returns the number of users with at least one successful enqueue.
    pub async fn send_to_group(
        &self,
        group_id: Uuid,
        exclude_user: Option<Uuid>,
        frame: &Message,
    ) -> Result<usize, RepoError> {
        let members = self.repo.list_group_members(group_id).await?;
        let mut reached = 0;
        for member in members {
            if Some(member) == exclude_user {
                continue;
            }
            if self.send_to_user(member, frame).await {
                reached += 1;
            }
        }
        Ok(reached)
    }

    /// Group members with no live connection, for push fan-out.
    pub async fn offline_group_members(
        &self,
        group_id: Uuid,
        exclude_user: Option<Uuid>,
    ) -> Result<Vec<Uuid>, RepoError> {
        let members = self.repo.list_group_members(group_id).await?;
        let connections = self.connections.read().await;
        Ok(members
            .into_iter()
            .filter(|m| Some(*m) != exclude_user && !connections.contains_key(m))
            .collect())
    }

    /// Fires the close signal and deregisters in one step. Used for slow
    /// consumers and stale queues; the write pump observes the signal and
    /// tears the socket down.
    async fn evict(&self, user_id: Uuid, conn_id: u64) {
        let (handle, went_offline) = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&user_id) {
                Some(per_user) => {
                    let removed = per_user.remove(&conn_id);
                    let empty = per_user.is_empty();
                    if empty {
                        connections.remove(&user_id);
                    }
                    (removed, empty)
                }
                None => (None, false),
            }
        };
        if let Some(handle) = handle {
            handle.close.send_replace(true);
        }
        if went_offline {
            if let Err(e) = self.repo.touch_last_seen(user_id, Utc::now()).await {
                warn!(user_id = %user_id, error = %e, "failed to stamp last_seen");
            }
        }
    }

    /// Shutdown drain: signal every connection to close, then wait for the
    /// write pumps to flush, bounded by `drain_window`.
    pub async fn shutdown(&self, drain_window: Duration) {
        {
            let connections = self.connections.read().await;
            for per_user in connections.values() {
                for handle in per_user.values() {
                    handle.close.send_replace(true);
                }
            }
        }
        let deadline = tokio::time::Instant::now() + drain_window;
        loop {
            let remaining = self.active_connection_count().await;
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "drain window elapsed with connections still open");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
