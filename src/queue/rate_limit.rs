//! Sliding-window dispatch rate limiter.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Tracks dispatch timestamps inside a rolling window. The ceiling is
/// configured below the platform's documented per-minute limit as a
/// safety margin.
#[derive(Debug)]
pub struct SlidingWindow {
    ceiling: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            ceiling: ceiling.max(1),
            window,
            stamps: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.stamps.front()
            && now.duration_since(*front) >= self.window
        {
            self.stamps.pop_front();
        }
    }

    /// `None` when a dispatch may happen now; otherwise the instant at
    /// which the oldest stamp leaves the window.
    pub fn ready_at(&mut self, now: Instant) -> Option<Instant> {
        self.prune(now);
        if self.stamps.len() < self.ceiling {
            None
        } else {
            self.stamps.front().map(|oldest| *oldest + self.window)
        }
    }

    /// Record one dispatch.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.stamps.push_back(now);
    }

    /// Dispatches still inside the window.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.stamps.len()
    }
}
