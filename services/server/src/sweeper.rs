//! Soft-deletes messages whose disappearing timer has elapsed. Never purges
//! rows; `deleted_at` is the terminal marker.

use std::sync::Arc;
use std::time::Duration;

use chat_core::repo::Repository;
use chat_core::RepoError;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const BATCH_LIMIT: i64 = 500;

pub async fn run(repo: Arc<dyn Repository>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    info!(interval_secs = interval.as_secs(), "expiry sweeper started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match tick(repo.as_ref(), Utc::now()).await {
                    Ok(0) => {}
                    Ok(swept) => debug!(swept, "expired messages soft-deleted"),
                    Err(e) => warn!(error = %e, "sweeper tick failed"),
                }
            }
        }
    }
    info!("expiry sweeper stopped");
}

pub async fn tick(repo: &dyn Repository, now: DateTime<Utc>) -> Result<usize, RepoError> {
    let expired = repo.list_expired(now, BATCH_LIMIT).await?;
    let mut swept = 0;
    for id in expired {
        if repo.soft_delete_message(id, now).await? {
            swept += 1;
        }
    }
    Ok(swept)
}
