//! Background promotion of scheduled messages into the delivery pipeline.
//!
//! Each tick claims due rows through the guarded atomic clear, so two
//! overlapping tickers (or a crash-restart replay) can never both deliver
//! the same message.

use std::sync::Arc;
use std::time::Duration;

use chat_core::repo::Repository;
use chat_core::RepoError;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;

const BATCH_LIMIT: i64 = 200;

pub async fn run(
    pipeline: Arc<Pipeline>,
    repo: Arc<dyn Repository>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    info!(interval_secs = interval.as_secs(), "scheduler started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match tick(&pipeline, repo.as_ref(), Utc::now()).await {
                    Ok(0) => {}
                    Ok(promoted) => debug!(promoted, "scheduled messages delivered"),
                    // Transient; the next tick retries the same rows.
                    Err(e) => warn!(error = %e, "scheduler tick failed"),
                }
            }
        }
    }
    info!("scheduler stopped");
}

/// One pass over the due set at `now`. Public and clock-parameterized so the
/// idempotence contract is testable without timers.
pub async fn tick(
    pipeline: &Pipeline,
    repo: &dyn Repository,
    now: DateTime<Utc>,
) -> Result<usize, RepoError> {
    let due = repo.list_due_scheduled(now, BATCH_LIMIT).await?;
    let mut promoted = 0;
    for msg in due {
        // Lost the claim: another tick already took this row.
        if !repo.clear_scheduled_guarded(msg.id, now).await? {
            continue;
        }
        if let Err(e) = pipeline.deliver_scheduled(&msg).await {
            warn!(message_id = %msg.id, error = %e, "scheduled delivery failed");
            continue;
        }
        promoted += 1;
    }
    Ok(promoted)
}
