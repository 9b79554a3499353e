//! Live scheduler counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters updated by the processing loop; read via `snapshot`.
#[derive(Debug, Default)]
pub struct QueueCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    queue_size: AtomicU64,
    wait_ms_total: AtomicU64,
    wait_count: AtomicU64,
}

impl QueueCounters {
    pub fn record_enqueued(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.queue_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, success: bool, wait_ms: u64) {
        self.queue_size.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.wait_ms_total.fetch_add(wait_ms, Ordering::Relaxed);
        self.wait_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, requests_per_minute: usize) -> MetricsSnapshot {
        let wait_count = self.wait_count.load(Ordering::Relaxed);
        let average_wait_ms = if wait_count > 0 {
            self.wait_ms_total.load(Ordering::Relaxed) as f64 / wait_count as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            successful_requests: self.successful.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            retried_requests: self.retried.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            average_wait_ms,
            requests_per_minute,
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub queue_size: u64,
    pub average_wait_ms: f64,
    pub requests_per_minute: usize,
}
