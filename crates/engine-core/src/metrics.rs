use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    timeouts_staged: AtomicU64,
    timeouts_completed: AtomicU64,
    batches_completed: AtomicU64,
    endpoints_migrated: AtomicU64,
    endpoints_skipped: AtomicU64,
    retry_count: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub timeouts_staged: u64,
    pub timeouts_completed: u64,
    pub batches_completed: u64,
    pub endpoints_migrated: u64,
    pub endpoints_skipped: u64,
    pub retry_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_staged(&self, count: u64) {
        self.inner.timeouts_staged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_completed(&self, timeouts: u64) {
        self.inner
            .timeouts_completed
            .fetch_add(timeouts, Ordering::Relaxed);
        self.inner.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_endpoints_migrated(&self) {
        self.inner.endpoints_migrated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_endpoints_skipped(&self) {
        self.inner.endpoints_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timeouts_staged: self.inner.timeouts_staged.load(Ordering::Relaxed),
            timeouts_completed: self.inner.timeouts_completed.load(Ordering::Relaxed),
            batches_completed: self.inner.batches_completed.load(Ordering::Relaxed),
            endpoints_migrated: self.inner.endpoints_migrated.load(Ordering::Relaxed),
            endpoints_skipped: self.inner.endpoints_skipped.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
