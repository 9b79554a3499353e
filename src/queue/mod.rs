//! Rate-limited, retrying, deduplicating write scheduler.
//!
//! One cooperative processing loop per queue instance serializes every
//! outbound write, which is what makes the per-minute ceiling trivially
//! correct without cross-worker coordination. The queue is an injectable
//! service: construct one per process (or per test) and tear it down with
//! `shutdown`. In-memory state is process-local — exactly-once apply
//! correctness rests on the persistent guard row, not on this scheduler.

pub mod metrics;
mod rate_limit;
mod retry;

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::board::{BoardWriter, WriteOp};
use crate::config::QueueConfig;
use crate::error::{Result, RouterError};

use metrics::QueueCounters;
use rate_limit::SlidingWindow;

pub use metrics::MetricsSnapshot;
pub use retry::RetryPolicy;

const WINDOW: Duration = Duration::from_secs(60);

/// Structured outcome of one scheduled write. Retry exhaustion is a
/// failed result, not an error — callers decide what a failure means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub data: Option<serde_json::Value>,
    pub error: Option<WriteFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFailure {
    pub message: String,
    pub code: String,
    pub retryable: bool,
}

struct TaskEntry {
    op: WriteOp,
    dedupe_key: Option<String>,
    waiters: Vec<oneshot::Sender<WriteResult>>,
    enqueued_at: Instant,
}

/// Max-heap key: higher priority first, then submission order.
#[derive(PartialEq, Eq)]
struct ReadyKey {
    priority: i32,
    seq: u64,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<u64, TaskEntry>,
    ready: BinaryHeap<ReadyKey>,
    dedupe: HashMap<String, u64>,
    next_seq: u64,
    shutdown: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    window: Mutex<SlidingWindow>,
    counters: QueueCounters,
    policy: RetryPolicy,
    writer: Arc<dyn BoardWriter>,
}

pub struct WriteQueue {
    inner: Arc<QueueInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    pub fn new(writer: Arc<dyn BoardWriter>, config: &QueueConfig) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            window: Mutex::new(SlidingWindow::new(config.per_minute_ceiling, WINDOW)),
            counters: QueueCounters::default(),
            policy: RetryPolicy::from_config(&config.retry),
            writer,
        });
        let handle = tokio::spawn(Self::run(Arc::clone(&inner)));
        Self {
            inner,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Schedule a write. Resolves once the write has succeeded, exhausted
    /// its retries, or failed fatally. A task sharing a still-pending
    /// `dedupe_key` subscribes to the pending task's outcome instead of
    /// submitting a duplicate operation.
    pub async fn enqueue(
        &self,
        op: WriteOp,
        priority: i32,
        dedupe_key: Option<String>,
    ) -> Result<WriteResult> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return Err(RouterError::QueueClosed("queue is shut down".into()));
            }

            let pending = dedupe_key
                .as_ref()
                .and_then(|key| state.dedupe.get(key).copied());
            if let Some(id) = pending
                && let Some(entry) = state.tasks.get_mut(&id)
            {
                debug!(kind = op.kind(), "Deduplicated onto pending write");
                entry.waiters.push(tx);
            } else {
                state.next_seq += 1;
                let seq = state.next_seq;
                if let Some(key) = &dedupe_key {
                    state.dedupe.insert(key.clone(), seq);
                }
                state.tasks.insert(
                    seq,
                    TaskEntry {
                        op,
                        dedupe_key,
                        waiters: vec![tx],
                        enqueued_at: Instant::now(),
                    },
                );
                state.ready.push(ReadyKey { priority, seq });
                self.inner.counters.record_enqueued();
                self.inner.notify.notify_one();
            }
        }

        rx.await
            .map_err(|_| RouterError::QueueClosed("processing loop dropped the task".into()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let per_minute = self.inner.window.lock().count(Instant::now());
        self.inner.counters.snapshot(per_minute)
    }

    /// Stop accepting work, drain what is already queued, and wait for
    /// the processing loop to exit.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
        }
        self.inner.notify.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(inner: Arc<QueueInner>) {
        loop {
            let next = {
                let mut state = inner.state.lock();
                match state.ready.pop() {
                    Some(key) => Some(key.seq),
                    None if state.shutdown => break,
                    None => None,
                }
            };

            let Some(seq) = next else {
                inner.notify.notified().await;
                continue;
            };

            let (op, enqueued_at) = {
                let state = inner.state.lock();
                let entry = state.tasks.get(&seq).expect("dequeued task entry");
                (entry.op.clone(), entry.enqueued_at)
            };

            let result = Self::execute_with_retry(&inner, &op).await;
            // Wait covers the full enqueue-to-completion span, including
            // rate-limit holds and retry backoff.
            let wait_ms = enqueued_at.elapsed().as_millis() as u64;

            let waiters = {
                let mut state = inner.state.lock();
                let entry = state.tasks.remove(&seq).expect("completed task entry");
                if let Some(key) = &entry.dedupe_key {
                    state.dedupe.remove(key);
                }
                entry.waiters
            };
            inner.counters.record_completed(result.success, wait_ms);
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        debug!("Write queue processing loop stopped");
    }

    async fn execute_with_retry(inner: &Arc<QueueInner>, op: &WriteOp) -> WriteResult {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            // Every attempt consumes a rate-limit slot.
            loop {
                let ready = inner.window.lock().ready_at(Instant::now());
                match ready {
                    None => break,
                    Some(at) => {
                        debug!("Rate ceiling reached; holding dispatch");
                        tokio::time::sleep_until(at).await;
                    }
                }
            }
            inner.window.lock().record(Instant::now());

            attempts += 1;
            match inner.writer.execute(op).await {
                Ok(data) => {
                    return WriteResult {
                        success: true,
                        attempts,
                        duration_ms: started.elapsed().as_millis() as u64,
                        data: Some(data),
                        error: None,
                    };
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    if !retryable || attempts >= inner.policy.max_attempts() {
                        warn!(
                            kind = op.kind(),
                            item_id = op.item_id(),
                            attempts,
                            error = %err,
                            "Write failed"
                        );
                        return WriteResult {
                            success: false,
                            attempts,
                            duration_ms: started.elapsed().as_millis() as u64,
                            data: None,
                            error: Some(WriteFailure {
                                message: err.to_string(),
                                code: err.code(),
                                retryable,
                            }),
                        };
                    }

                    inner.counters.record_retry();
                    // A 429 with a retry-after hint overrides the backoff.
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| inner.policy.delay_for(attempts));
                    debug!(
                        kind = op.kind(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying write"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    use crate::config::RetryConfig;
    use crate::error::WriteError;

    type Outcome = std::result::Result<serde_json::Value, WriteError>;

    struct ScriptedWriter {
        script: Mutex<VecDeque<Outcome>>,
        default: Outcome,
        log: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedWriter {
        fn succeeding() -> Self {
            Self::with_default(Ok(json!({"ok": true})))
        }

        fn with_default(default: Outcome) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default,
                log: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, outcome: Outcome) {
            self.script.lock().push_back(outcome);
        }

        fn items_seen(&self) -> Vec<String> {
            self.log.lock().iter().map(|(id, _)| id.clone()).collect()
        }

        fn stamps(&self) -> Vec<Instant> {
            self.log.lock().iter().map(|(_, at)| *at).collect()
        }
    }

    #[async_trait]
    impl BoardWriter for ScriptedWriter {
        async fn execute(&self, op: &WriteOp) -> Outcome {
            self.log
                .lock()
                .push((op.item_id().to_string(), Instant::now()));
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.default.clone())
        }
    }

    fn status_op(item_id: &str) -> WriteOp {
        WriteOp::SetStatus {
            board_id: "b1".into(),
            item_id: item_id.into(),
            column_id: "status".into(),
            label: "Routed".into(),
        }
    }

    fn config(ceiling: usize, max_attempts: u32) -> QueueConfig {
        QueueConfig {
            per_minute_ceiling: ceiling,
            retry: RetryConfig {
                max_attempts,
                base_delay_ms: 100,
                multiplier: 2.0,
                max_delay_ms: 5_000,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_then_fifo() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer.clone(), &config(100, 1));

        let (a, b, c, d) = tokio::join!(
            queue.enqueue(status_op("low"), 0, None),
            queue.enqueue(status_op("first"), 5, None),
            queue.enqueue(status_op("second"), 5, None),
            queue.enqueue(status_op("high"), 9, None),
        );
        for result in [a, b, c, d] {
            assert!(result.unwrap().success);
        }

        assert_eq!(writer.items_seen(), vec!["high", "first", "second", "low"]);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_shares_pending_outcome() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer.clone(), &config(100, 1));

        let (a, b) = tokio::join!(
            queue.enqueue(status_op("item"), 0, Some("k1".into())),
            queue.enqueue(status_op("item"), 0, Some("k1".into())),
        );
        assert!(a.unwrap().success);
        assert!(b.unwrap().success);

        // One operation reached the writer; both callers saw its outcome.
        assert_eq!(writer.items_seen().len(), 1);
        assert_eq!(queue.metrics().total_requests, 1);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_key_reusable_after_completion() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer.clone(), &config(100, 1));

        queue
            .enqueue(status_op("item"), 0, Some("k1".into()))
            .await
            .unwrap();
        queue
            .enqueue(status_op("item"), 0, Some("k1".into()))
            .await
            .unwrap();

        assert_eq!(writer.items_seen().len(), 2);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_bound_holds_in_any_window() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer.clone(), &config(2, 1));

        let (a, b, c, d, e) = tokio::join!(
            queue.enqueue(status_op("1"), 0, None),
            queue.enqueue(status_op("2"), 0, None),
            queue.enqueue(status_op("3"), 0, None),
            queue.enqueue(status_op("4"), 0, None),
            queue.enqueue(status_op("5"), 0, None),
        );
        for result in [a, b, c, d, e] {
            assert!(result.unwrap().success);
        }

        let stamps = writer.stamps();
        assert_eq!(stamps.len(), 5);
        // Never more than 2 dispatches inside any trailing 60s window.
        for pair in stamps.windows(3) {
            assert!(pair[2].duration_since(pair[0]) >= WINDOW);
        }
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_failed_result() {
        let writer = Arc::new(ScriptedWriter::with_default(Err(WriteError::Network(
            "connection reset".into(),
        ))));
        let queue = WriteQueue::new(writer.clone(), &config(100, 4));

        let result = queue.enqueue(status_op("item"), 0, None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        let failure = result.error.unwrap();
        assert_eq!(failure.code, "NETWORK");
        assert!(failure.retryable);

        assert_eq!(writer.items_seen().len(), 4);
        let metrics = queue.metrics();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.retried_requests, 3);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_client_error_fails_immediately() {
        let writer = Arc::new(ScriptedWriter::with_default(Err(WriteError::from_status(
            400,
            "bad column id",
            None,
        ))));
        let queue = WriteQueue::new(writer.clone(), &config(100, 5));

        let result = queue.enqueue(status_op("item"), 0, None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert!(!result.error.unwrap().retryable);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honored() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        writer.push(Err(WriteError::RateLimited {
            retry_after_secs: Some(45),
        }));
        let queue = WriteQueue::new(writer.clone(), &config(100, 3));

        let started = Instant::now();
        let result = queue.enqueue(status_op("item"), 0, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert!(started.elapsed() >= Duration::from_secs(45));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown_is_refused() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer, &config(100, 1));
        queue.shutdown().await;

        let err = queue.enqueue(status_op("item"), 0, None).await.unwrap_err();
        assert!(matches!(err, RouterError::QueueClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_wait_tracks_queue_delay() {
        let writer = Arc::new(ScriptedWriter::succeeding());
        let queue = WriteQueue::new(writer, &config(1, 1));

        let (a, b) = tokio::join!(
            queue.enqueue(status_op("1"), 0, None),
            queue.enqueue(status_op("2"), 0, None),
        );
        assert!(a.unwrap().success);
        assert!(b.unwrap().success);

        // The second task waited out a full rate window before dispatch.
        assert!(queue.metrics().average_wait_ms >= 25_000.0);
        queue.shutdown().await;
    }
}
