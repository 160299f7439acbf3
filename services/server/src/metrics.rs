use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters. Lock-free by design; every hot path only does an
/// atomic add.
#[derive(Debug, Default)]
pub struct Metrics {
    pub messages_sent: AtomicU64,
    pub frames_enqueued: AtomicU64,
    pub slow_evictions: AtomicU64,
    pub pushes_dispatched: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub frames_enqueued: u64,
    pub slow_evictions: u64,
    pub pushes_dispatched: u64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            slow_evictions: self.slow_evictions.load(Ordering::Relaxed),
            pushes_dispatched: self.pushes_dispatched.load(Ordering::Relaxed),
        }
    }
}
