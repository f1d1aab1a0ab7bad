//! The priority dispatch queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pulsebridge_core::{
    ActionExecutor, ActionPayload, ExecuteError, QueueConfig, QueueEvent, QueueItem,
    QueueItemStatus, QueueStats,
};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dlq::{DeadLetterEntry, DeadLetterQueue};
use crate::rate::RateWindow;
use crate::retry::backoff_delay;
use crate::stats::StatsWindow;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Priority-ordered, rate-limited action dispatcher.
///
/// Cloning is cheap; all clones share one queue. The dispatch loop is
/// spawned lazily on the first enqueue and exits once the queue drains,
/// so an idle queue holds no task.
#[derive(Clone)]
pub struct ActionQueue {
    shared: Arc<Shared>,
}

struct Shared {
    config: QueueConfig,
    executor: Arc<dyn ActionExecutor>,
    state: Mutex<State>,
    dlq: DeadLetterQueue,
    events: broadcast::Sender<QueueEvent>,
    stats: Mutex<StatsWindow>,
    rate: Mutex<RateWindow>,
    seq: AtomicU64,
    loop_running: AtomicBool,
}

#[derive(Default)]
struct State {
    /// Pending items, kept sorted by [`QueueItem::order_key`].
    pending: Vec<QueueItem>,
    /// Whether an item is currently executing.
    processing: bool,
    /// Items waiting out a retry backoff timer.
    parked: usize,
}

impl ActionQueue {
    #[must_use]
    pub fn new(config: QueueConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let stats_window = config.stats_window;
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                state: Mutex::new(State::default()),
                dlq: DeadLetterQueue::new(),
                events,
                stats: Mutex::new(StatsWindow::new(stats_window)),
                rate: Mutex::new(RateWindow::new()),
                seq: AtomicU64::new(0),
                loop_running: AtomicBool::new(false),
            }),
        }
    }

    /// Accept an action for dispatch. Returns `false` when the queue is at
    /// capacity; the rejected item is reported via an overflow event and
    /// dropped.
    pub fn enqueue(&self, payload: ActionPayload, priority: i32) -> bool {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let item = QueueItem::new(payload, priority, seq);
        {
            let mut state = self.shared.state.lock().expect("queue mutex poisoned");
            if state.pending.len() >= self.shared.config.capacity {
                drop(state);
                warn!(
                    item_id = %item.id,
                    capacity = self.shared.config.capacity,
                    "queue at capacity, rejecting item"
                );
                let _ = self.shared.events.send(QueueEvent::Overflow { item });
                return false;
            }
            state.pending.push(item.clone());
            state.pending.sort_by_key(QueueItem::order_key);
        }
        debug!(item_id = %item.id, priority, seq, "item enqueued");
        let _ = self.shared.events.send(QueueEvent::Enqueued { item });
        self.ensure_loop();
        true
    }

    /// Move a dead-lettered item back into the queue with a fresh retry
    /// budget. Returns `false` when no dead-letter entry has that item id.
    pub fn requeue(&self, item_id: &str) -> bool {
        let Some(entry) = self.shared.dlq.take(item_id) else {
            return false;
        };
        let mut item = entry.item;
        item.retry_count = 0;
        item.status = QueueItemStatus::Pending;
        item.last_error = None;
        item.seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        info!(item_id = %item.id, "requeuing dead-lettered item");
        {
            let mut state = self.shared.state.lock().expect("queue mutex poisoned");
            state.pending.push(item.clone());
            state.pending.sort_by_key(QueueItem::order_key);
        }
        let _ = self.shared.events.send(QueueEvent::Enqueued { item });
        self.ensure_loop();
        true
    }

    /// Remove a still-pending item. Items already executing or retrying in
    /// a backoff timer are not affected.
    pub fn cancel(&self, item_id: &str) -> bool {
        let mut state = self.shared.state.lock().expect("queue mutex poisoned");
        let before = state.pending.len();
        state.pending.retain(|item| item.id != item_id);
        before != state.pending.len()
    }

    /// Items currently live in the queue: pending, executing, or waiting
    /// out a retry backoff.
    #[must_use]
    pub fn depth(&self) -> usize {
        let state = self.shared.state.lock().expect("queue mutex poisoned");
        state.pending.len() + usize::from(state.processing) + state.parked
    }

    #[must_use]
    pub fn dead_letter_depth(&self) -> usize {
        self.shared.dlq.len()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared.dlq.entries()
    }

    /// Current dispatch statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let rate = self
            .shared
            .rate
            .lock()
            .expect("queue mutex poisoned")
            .rate(Instant::now());
        self.shared
            .stats
            .lock()
            .expect("queue mutex poisoned")
            .snapshot(rate)
    }

    /// Subscribe to queue lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    fn ensure_loop(&self) {
        if !self.shared.loop_running.swap(true, Ordering::AcqRel) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                dispatch_loop(shared).await;
            });
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    debug!("dispatch loop started");
    let mut tick = tokio::time::interval(shared.config.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;

        let item = {
            let mut state = shared.state.lock().expect("queue mutex poisoned");
            if state.pending.is_empty() {
                // Clear the running flag, then re-check: an enqueue racing
                // with the drain may have seen the flag still set and
                // skipped its own spawn.
                shared.loop_running.store(false, Ordering::Release);
                if state.pending.is_empty()
                    || shared.loop_running.swap(true, Ordering::AcqRel)
                {
                    debug!("dispatch loop drained, stopping");
                    return;
                }
                continue;
            }
            let now = Instant::now();
            let allowed = shared
                .rate
                .lock()
                .expect("queue mutex poisoned")
                .would_allow(shared.config.max_rate_per_second, now);
            if !allowed {
                continue;
            }
            let mut item = state.pending.remove(0);
            item.status = QueueItemStatus::Processing;
            state.processing = true;
            shared
                .rate
                .lock()
                .expect("queue mutex poisoned")
                .record(now);
            item
        };

        execute_one(&shared, item).await;
        shared
            .state
            .lock()
            .expect("queue mutex poisoned")
            .processing = false;
    }
}

async fn execute_one(shared: &Arc<Shared>, mut item: QueueItem) {
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        shared.config.execute_timeout,
        shared.executor.execute(&item.payload),
    )
    .await;
    #[allow(clippy::cast_precision_loss)]
    let elapsed_ms = started.elapsed().as_micros() as f64 / 1000.0;

    let error = match outcome {
        Ok(Ok(_)) => {
            item.status = QueueItemStatus::Success;
            debug!(item_id = %item.id, elapsed_ms, "item dispatched");
            shared
                .stats
                .lock()
                .expect("queue mutex poisoned")
                .record_success(elapsed_ms);
            let _ = shared.events.send(QueueEvent::Success { item });
            return;
        }
        Ok(Err(err)) => err.to_string(),
        Err(_) => ExecuteError::Transport("execute timed out".to_owned()).to_string(),
    };

    item.last_error = Some(error.clone());

    if item.retry_count < shared.config.max_retries {
        item.retry_count += 1;
        item.status = QueueItemStatus::Retrying;
        let delay = backoff_delay(
            shared.config.retry_base,
            shared.config.retry_multiplier,
            item.retry_count,
        );
        warn!(
            item_id = %item.id,
            retry = item.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "execute failed, scheduling retry"
        );
        shared
            .stats
            .lock()
            .expect("queue mutex poisoned")
            .record_retry();
        shared.state.lock().expect("queue mutex poisoned").parked += 1;
        let _ = shared.events.send(QueueEvent::Retry { item: item.clone() });

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            item.status = QueueItemStatus::Pending;
            {
                let mut state = shared.state.lock().expect("queue mutex poisoned");
                state.parked -= 1;
                state.pending.push(item);
                state.pending.sort_by_key(QueueItem::order_key);
            }
            let queue = ActionQueue { shared };
            queue.ensure_loop();
        });
    } else {
        item.status = QueueItemStatus::Failed;
        let attempts = item.retry_count + 1;
        warn!(
            item_id = %item.id,
            attempts,
            error = %error,
            "retries exhausted, moving item to dead-letter set"
        );
        shared
            .stats
            .lock()
            .expect("queue mutex poisoned")
            .record_failure(elapsed_ms);
        shared.dlq.push(item.clone(), error, attempts);
        let _ = shared.events.send(QueueEvent::Failed { item });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn payload(action: &str) -> ActionPayload {
        ActionPayload::new("vibrate", action, serde_json::json!({}))
    }

    /// Records dispatch order and the instant of each call.
    struct Recorder {
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn actions(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(a, _)| a.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ActionExecutor for Recorder {
        async fn execute(
            &self,
            payload: &ActionPayload,
        ) -> Result<serde_json::Value, ExecuteError> {
            self.calls
                .lock()
                .unwrap()
                .push((payload.action.clone(), Instant::now()));
            Ok(serde_json::Value::Null)
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl ActionExecutor for AlwaysFail {
        async fn execute(&self, _: &ActionPayload) -> Result<serde_json::Value, ExecuteError> {
            Err(ExecuteError::Execution("device rejected".to_owned()))
        }
    }

    struct Hang;

    #[async_trait]
    impl ActionExecutor for Hang {
        async fn execute(&self, _: &ActionPayload) -> Result<serde_json::Value, ExecuteError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::Value::Null)
        }
    }

    /// Fails the first `n` calls, then succeeds.
    struct FailN {
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for FailN {
        async fn execute(&self, _: &ActionPayload) -> Result<serde_json::Value, ExecuteError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(ExecuteError::Transport("connection reset".to_owned()))
            } else {
                Ok(serde_json::Value::Null)
            }
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            tick_interval: Duration::from_millis(10),
            retry_base: Duration::from_millis(100),
            ..QueueConfig::default()
        }
    }

    async fn drain(queue: &ActionQueue) {
        while queue.depth() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until the given terminal condition holds.
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_by_priority_then_fifo() {
        let recorder = Recorder::new();
        let queue = ActionQueue::new(fast_config(), recorder.clone());

        queue.enqueue(payload("low"), 1);
        queue.enqueue(payload("high-first"), 5);
        queue.enqueue(payload("mid"), 3);
        queue.enqueue(payload("high-second"), 5);
        drain(&queue).await;

        assert_eq!(
            recorder.actions(),
            vec!["high-first", "high-second", "mid", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn respects_rate_limit() {
        let recorder = Recorder::new();
        let config = QueueConfig {
            max_rate_per_second: 5,
            capacity: 50,
            ..fast_config()
        };
        let queue = ActionQueue::new(config, recorder.clone());
        for i in 0..20 {
            queue.enqueue(payload(&format!("a{i}")), 0);
        }
        drain(&queue).await;

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 20);
        // In any trailing one-second window at most 5 dispatch starts.
        for (i, (_, start)) in calls.iter().enumerate() {
            let in_window = calls[..i]
                .iter()
                .filter(|(_, t)| start.duration_since(*t) <= Duration::from_secs(1))
                .count();
            assert!(in_window < 5, "dispatch {i} exceeded the rate limit");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_land_in_dlq() {
        let config = QueueConfig {
            max_retries: 3,
            ..fast_config()
        };
        let queue = ActionQueue::new(config, Arc::new(AlwaysFail));
        let mut events = queue.subscribe();
        queue.enqueue(payload("doomed"), 0);
        wait_until(|| queue.dead_letter_depth() == 1).await;

        let mut retries = 0;
        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                QueueEvent::Retry { .. } => retries += 1,
                QueueEvent::Failed { item } => {
                    failed += 1;
                    assert_eq!(item.status, QueueItemStatus::Failed);
                    assert_eq!(
                        item.last_error.as_deref(),
                        Some("execution failed: device rejected")
                    );
                }
                _ => {}
            }
        }
        assert_eq!(retries, 3);
        assert_eq!(failed, 1);
        assert_eq!(queue.dead_letter_depth(), 1);
        let entry = &queue.dead_letters()[0];
        assert_eq!(entry.attempts, 4);

        let stats = queue.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_within_budget() {
        let config = QueueConfig {
            max_retries: 3,
            ..fast_config()
        };
        let executor = Arc::new(FailN {
            remaining: AtomicUsize::new(2),
        });
        let queue = ActionQueue::new(config, executor);
        queue.enqueue(payload("flaky"), 0);
        wait_until(|| queue.stats().total_success == 1).await;

        assert_eq!(queue.dead_letter_depth(), 0);
        assert_eq!(queue.stats().total_retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_resets_retry_budget() {
        let config = QueueConfig {
            max_retries: 1,
            ..fast_config()
        };
        let queue = ActionQueue::new(config, Arc::new(AlwaysFail));
        queue.enqueue(payload("doomed"), 0);
        wait_until(|| queue.dead_letter_depth() == 1).await;

        let id = queue.dead_letters()[0].item.id.clone();
        assert!(queue.requeue(&id));
        assert_eq!(queue.dead_letter_depth(), 0);

        // Failed again with a full (reset) budget: one retry, then back to
        // the dead-letter set.
        wait_until(|| queue.dead_letter_depth() == 1).await;
        assert_eq!(queue.dead_letters()[0].attempts, 2);
        assert!(!queue.requeue("no-such-id"));
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_rejects_and_reports() {
        let config = QueueConfig {
            capacity: 2,
            // Slow ticks so nothing drains during the burst.
            tick_interval: Duration::from_secs(60),
            ..QueueConfig::default()
        };
        let queue = ActionQueue::new(config, Recorder::new());
        let mut events = queue.subscribe();

        assert!(queue.enqueue(payload("a"), 0));
        assert!(queue.enqueue(payload("b"), 0));
        assert!(!queue.enqueue(payload("c"), 0));

        let mut labels = Vec::new();
        while let Ok(event) = events.try_recv() {
            labels.push(event.label());
        }
        assert_eq!(labels, vec!["enqueued", "enqueued", "overflow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_pending_item() {
        let config = QueueConfig {
            tick_interval: Duration::from_secs(60),
            ..QueueConfig::default()
        };
        let queue = ActionQueue::new(config, Recorder::new());
        let mut events = queue.subscribe();
        queue.enqueue(payload("a"), 0);
        let QueueEvent::Enqueued { item } = events.recv().await.unwrap() else {
            panic!("expected enqueued event");
        };

        assert!(queue.cancel(&item.id));
        assert_eq!(queue.depth(), 0);
        assert!(!queue.cancel(&item.id));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let config = QueueConfig {
            max_retries: 0,
            execute_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let queue = ActionQueue::new(config, Arc::new(Hang));
        queue.enqueue(payload("slow"), 0);
        wait_until(|| queue.dead_letter_depth() == 1).await;

        assert_eq!(queue.dead_letter_depth(), 1);
        assert!(queue.dead_letters()[0].error.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn depth_counts_backoff_parked_items() {
        let config = QueueConfig {
            max_retries: 1,
            ..fast_config()
        };
        let executor = Arc::new(FailN {
            remaining: AtomicUsize::new(1),
        });
        let queue = ActionQueue::new(config, executor);
        let mut events = queue.subscribe();
        queue.enqueue(payload("flaky"), 0);

        // First attempt fails; the item moves into its backoff timer.
        loop {
            if let QueueEvent::Retry { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        // Parked in the timer: not pending, not executing, still live.
        assert_eq!(queue.depth(), 1);

        wait_until(|| queue.stats().total_success == 1).await;
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_restarts_after_drain() {
        let recorder = Recorder::new();
        let queue = ActionQueue::new(fast_config(), recorder.clone());

        queue.enqueue(payload("first"), 0);
        drain(&queue).await;
        // Give the drained loop time to observe the empty queue and exit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        queue.enqueue(payload("second"), 0);
        drain(&queue).await;
        assert_eq!(recorder.actions(), vec!["first", "second"]);
    }
}
