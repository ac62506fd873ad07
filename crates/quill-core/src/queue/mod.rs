//! Task queue: priority dispatch, bounded concurrency, retries with
//! exponential backoff, and result delivery.
//!
//! `TaskQueue` is a cheap clonable handle. Dispatch is event driven: every
//! enqueue, completion, and resume spawns a dispatch pass, and a periodic
//! ticker covers tasks whose backoff or delay has just run out. A pass keeps
//! popping eligible tasks until the concurrency limit is reached or nothing
//! is due.
//!
//! Concurrency slots are semaphore permits. A permit is taken before the
//! backend is asked for a task and released only after the task's outcome is
//! recorded, so the number of executing tasks never exceeds the limit even
//! with many passes racing.

mod results;
mod retry;
mod stats;

pub use retry::RetryPolicy;
pub use stats::QueueStats;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::domain::task::deadline_after;
use crate::domain::{
    Decider, Decision, DefaultDecider, QueueEvent, Task, TaskError, TaskId, TaskResult, TaskType,
};
use crate::error::QueueError;
use crate::ports::{Clock, IdGenerator, QueueBackend, SystemClock, UlidGenerator};
use crate::typed::Job;
use results::ResultStore;

/// Per-task overrides for `enqueue`. Unset fields fall back to the queue
/// config.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub max_attempts: Option<u32>,
    /// Hold the task back for this long before it becomes eligible.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One entry of `enqueue_batch`.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub task_type: TaskType,
    pub payload: Value,
    pub options: EnqueueOptions,
}

impl EnqueueRequest {
    pub fn new(task_type: impl Into<TaskType>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            options: EnqueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct TaskQueue<B: QueueBackend> {
    inner: Arc<QueueInner<B>>,
}

impl<B: QueueBackend> Clone for TaskQueue<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct QueueInner<B> {
    backend: B,
    config: QueueConfig,
    decider: Box<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,

    concurrency: usize,
    slots: Arc<Semaphore>,
    paused: AtomicBool,
    stopped: AtomicBool,
    sequence: AtomicU64,

    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,

    results: Mutex<ResultStore>,
    events: broadcast::Sender<QueueEvent>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: QueueBackend> TaskQueue<B> {
    /// Build a queue on the system clock with the default decider.
    ///
    /// Must be called from within a Tokio runtime: the dispatch ticker is
    /// spawned immediately.
    pub fn new(backend: B, config: QueueConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let decider = DefaultDecider::new(config.retry_policy())
            .retry_configuration_errors(config.retry_missing_processor);
        Self::with_parts(backend, config, clock, Box::new(decider))
    }

    pub fn with_parts(
        backend: B,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        decider: Box<dyn Decider>,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(QueueInner {
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            results: Mutex::new(ResultStore::new(config.store_results, config.result_ttl())),
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            events,
            ticker: Mutex::new(None),
            backend,
            decider,
            clock,
            config,
        });

        let ticker = spawn_ticker(Arc::downgrade(&inner), inner.config.poll_interval());
        *inner.ticker.lock() = Some(ticker);

        info!(
            concurrency,
            poll_interval_ms = inner.config.poll_interval_ms,
            "task queue started"
        );
        Self { inner }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Receive lifecycle events. Slow receivers lag and drop old events;
    /// the queue never waits on them.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let task = inner.build_task(task_type.into(), payload, options);
        let (task_id, task_type, priority) = (task.id, task.task_type.clone(), task.priority);
        inner.backend.save_task(task).await?;

        debug!(%task_id, %task_type, priority, "task enqueued");
        inner.emit(QueueEvent::Enqueued {
            task_id,
            task_type,
            priority,
        });
        inner.trigger();
        Ok(task_id)
    }

    /// Enqueue a typed job under `J::TYPE`.
    pub async fn enqueue_typed<J: Job>(
        &self,
        job: &J,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let payload = serde_json::to_value(job)?;
        self.enqueue(J::TYPE, payload, options).await
    }

    /// Enqueue in order. Stops at the first failure; tasks enqueued before
    /// it stay queued.
    pub async fn enqueue_batch(
        &self,
        requests: impl IntoIterator<Item = EnqueueRequest>,
    ) -> Result<Vec<TaskId>, QueueError> {
        let mut ids = Vec::new();
        for request in requests {
            ids.push(
                self.enqueue(request.task_type, request.payload, request.options)
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Look up a finished task's result.
    ///
    /// Without a timeout this only consults stored results. With one, it
    /// waits up to `timeout` for the task to finish and returns `None` on
    /// expiry.
    pub async fn get_result(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Option<TaskResult> {
        let (receiver, timeout) = {
            let mut results = self.inner.results.lock();
            if let Some(result) = results.get(&task_id, Instant::now()) {
                return Some(result);
            }
            let timeout = timeout?;
            (results.subscribe(task_id), timeout)
        };

        let waited = tokio::time::timeout(timeout, receiver).await;
        match waited {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) | Err(_) => {
                self.inner.results.lock().forget_closed(&task_id);
                None
            }
        }
    }

    /// Stop starting new tasks. Running tasks finish normally.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("queue paused");
            self.inner.emit(QueueEvent::Paused);
        }
    }

    pub fn resume(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            warn!("resume ignored: queue is stopped");
            return;
        }
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("queue resumed");
            self.inner.emit(QueueEvent::Resumed);
        }
        self.inner.trigger();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Remove a queued (or backing-off) task. Returns `false` when the task
    /// is not stored, e.g. because it is already running or finished.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let removed = self.inner.backend.delete_task(&task_id).await?;
        if removed {
            debug!(%task_id, "task cancelled");
            self.inner.emit(QueueEvent::Cancelled { task_id });
        }
        Ok(removed)
    }

    /// Drop every queued task. Running tasks are unaffected.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let removed = self.inner.backend.clear().await?;
        info!(removed, "queue cleared");
        self.inner.emit(QueueEvent::Cleared { removed });
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = &self.inner;
        Ok(QueueStats {
            pending: inner.backend.pending_count().await?,
            running: inner.in_flight(),
            completed: inner.completed.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            retried: inner.retried.load(Ordering::Relaxed),
            paused: inner.paused.load(Ordering::SeqCst),
        })
    }

    /// Stop dispatching for good and wait for in-flight tasks.
    ///
    /// Queued tasks stay in the backend. With `stop_timeout_ms` set, gives up
    /// after that long and returns `StopTimeout`; the abandoned tasks keep
    /// running in the background and their outcomes are still recorded.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let inner = &self.inner;
        inner.stopped.store(true, Ordering::SeqCst);
        inner.paused.store(true, Ordering::SeqCst);
        let ticker = inner.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }

        let deadline = inner
            .config
            .stop_timeout()
            .map(|timeout| deadline_after(Instant::now(), timeout));
        loop {
            let in_flight = inner.in_flight();
            if in_flight == 0 {
                break;
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                warn!(in_flight, "queue stop timed out");
                inner.emit(QueueEvent::Stopped { forced: true });
                return Err(QueueError::StopTimeout { in_flight });
            }
            tokio::time::sleep(inner.config.stop_poll_interval()).await;
        }

        info!("queue stopped");
        inner.emit(QueueEvent::Stopped { forced: false });
        Ok(())
    }
}

impl<B: QueueBackend> QueueInner<B> {
    fn build_task(&self, task_type: TaskType, payload: Value, options: EnqueueOptions) -> Task {
        Task {
            id: self.ids.generate_task_id(),
            task_type,
            payload,
            priority: options.priority.unwrap_or(self.config.default_priority),
            created_at: self.clock.now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            attempts: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            last_error: None,
            scheduled_for: options
                .delay
                .map(|delay| deadline_after(Instant::now(), delay)),
        }
    }

    /// Permits currently held: executing tasks plus passes mid-pop.
    fn in_flight(&self) -> usize {
        self.concurrency - self.slots.available_permits()
    }

    fn emit(&self, event: QueueEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn trigger(self: &Arc<Self>) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).dispatch_pass());
    }

    async fn dispatch_pass(self: Arc<Self>) {
        loop {
            if self.paused.load(Ordering::SeqCst) {
                return;
            }
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return;
            };
            // pause may have landed while we took the permit
            if self.paused.load(Ordering::SeqCst) {
                return;
            }

            let task = match self.backend.next_task(Instant::now()).await {
                Ok(Some(task)) => task,
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "dispatch pass could not fetch a task");
                    return;
                }
            };
            tokio::spawn(Arc::clone(&self).execute(task, permit));
        }
    }

    async fn execute(self: Arc<Self>, task: Task, permit: OwnedSemaphorePermit) {
        let attempt = task.attempts + 1;
        debug!(task_id = %task.id, task_type = %task.task_type, attempt, "task started");
        self.emit(QueueEvent::Started {
            task_id: task.id,
            task_type: task.task_type.clone(),
            attempt,
        });

        let started = Instant::now();
        let outcome = self.run_processor(&task).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(value) => self.complete(task, value, duration_ms).await,
            Err(error) => self.fail(task, error, duration_ms).await,
        }

        drop(permit);
        self.trigger();
    }

    /// Run the backend's processor on its own Tokio task so a panic turns
    /// into a retryable error instead of taking the permit with it.
    async fn run_processor(self: &Arc<Self>, task: &Task) -> Result<Value, TaskError> {
        let inner = Arc::clone(self);
        let task = task.clone();
        let handle = tokio::spawn(async move { inner.backend.process_task(&task).await });
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(TaskError::transient(format!(
                "processor panicked: {join_error}"
            ))),
        }
    }

    async fn complete(&self, task: Task, value: Value, duration_ms: u64) {
        let result = TaskResult::completed(
            task.id,
            task.task_type.clone(),
            value,
            self.clock.now(),
            duration_ms,
        );
        if let Err(err) = self.backend.delete_task(&task.id).await {
            warn!(task_id = %task.id, error = %err, "could not delete completed task");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.results.lock().publish(result.clone(), Instant::now());

        info!(task_id = %task.id, task_type = %task.task_type, duration_ms, "task completed");
        self.emit(QueueEvent::Completed(result));
    }

    async fn fail(&self, mut task: Task, error: TaskError, duration_ms: u64) {
        task.attempts += 1;
        task.last_error = Some(error.message.clone());

        match self.decider.decide(&task, &error) {
            Decision::Retry { delay, reason } => {
                task.schedule_retry(Instant::now(), delay, error.message.clone());
                let (task_id, attempts) = (task.id, task.attempts);
                let requeue = task.clone();
                if let Err(err) = self.backend.update_task(requeue).await {
                    let lost = TaskError::new(
                        error.kind,
                        format!("{} (retry not persisted: {err})", error.message),
                    );
                    self.finish_failed(task, lost, duration_ms, "retry could not be stored")
                        .await;
                    return;
                }
                self.retried.fetch_add(1, Ordering::Relaxed);

                warn!(%task_id, attempts, ?delay, error = %error, "task retry scheduled: {reason}");
                self.emit(QueueEvent::Retry {
                    task_id,
                    attempts,
                    error: error.message,
                    delay,
                    next_attempt_at: wall_clock_after(self.clock.now(), delay),
                });
            }
            Decision::Fail { reason } => {
                self.finish_failed(task, error, duration_ms, &reason).await;
            }
        }
    }

    async fn finish_failed(&self, task: Task, error: TaskError, duration_ms: u64, reason: &str) {
        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempts = task.attempts,
            error = %error,
            "task failed: {reason}"
        );
        let result = TaskResult::failed(
            task.id,
            task.task_type.clone(),
            error,
            task.attempts,
            self.clock.now(),
            duration_ms,
        );
        if let Err(err) = self.backend.delete_task(&task.id).await {
            warn!(task_id = %task.id, error = %err, "could not delete failed task");
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.results.lock().publish(result.clone(), Instant::now());
        self.emit(QueueEvent::Failed(result));
    }
}

impl<B> Drop for QueueInner<B> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

fn wall_clock_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Periodic dispatch trigger and result-TTL sweep. Holds only a weak
/// reference so a dropped queue shuts it down.
fn spawn_ticker<B: QueueBackend>(queue: Weak<QueueInner<B>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(inner) = queue.upgrade() else {
                break;
            };
            let purged = inner.results.lock().purge_expired(Instant::now());
            if purged > 0 {
                debug!(purged, "expired task results removed");
            }
            inner.trigger();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, TaskState};
    use crate::impls::InMemoryBackend;
    use crate::typed::handler::fixtures::{CountWords, CountWordsHandler};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn config() -> QueueConfig {
        QueueConfig {
            concurrency: 1,
            poll_interval_ms: 50,
            ..QueueConfig::default()
        }
    }

    fn queue(config: QueueConfig) -> TaskQueue<InMemoryBackend> {
        TaskQueue::new(InMemoryBackend::new(), config)
    }

    const WAIT: Option<Duration> = Some(Duration::from_secs(600));

    /// Records the `n` field of each payload in execution order.
    fn record_order(queue: &TaskQueue<InMemoryBackend>) -> Arc<Mutex<Vec<i64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        queue
            .backend()
            .register_fn("record", move |payload: Value| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(payload["n"].as_i64().unwrap_or(-1));
                    Ok::<_, TaskError>(Value::Null)
                }
            })
            .unwrap();
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn higher_priority_runs_first() {
        let queue = queue(config());
        let seen = record_order(&queue);

        queue.pause();
        let low = queue
            .enqueue("record", json!({"n": 1}), EnqueueOptions::new().priority(5))
            .await
            .unwrap();
        let high = queue
            .enqueue("record", json!({"n": 2}), EnqueueOptions::new().priority(10))
            .await
            .unwrap();
        queue.resume();

        assert!(queue.get_result(low, WAIT).await.unwrap().is_success());
        assert!(queue.get_result(high, WAIT).await.unwrap().is_success());
        assert_eq!(*seen.lock(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn equal_priority_runs_in_enqueue_order() {
        let queue = queue(config());
        let seen = record_order(&queue);

        queue.pause();
        let priorities = [1, 3, 1, 2, 3, 1, 2];
        let mut ids = Vec::new();
        for (n, priority) in priorities.iter().enumerate() {
            let id = queue
                .enqueue(
                    "record",
                    json!({"n": n}),
                    EnqueueOptions::new().priority(*priority),
                )
                .await
                .unwrap();
            ids.push(id);
        }
        queue.resume();
        for id in ids {
            queue.get_result(id, WAIT).await.unwrap();
        }

        // priority 3 first, then 2, then 1; ties by enqueue index
        assert_eq!(*seen.lock(), vec![1, 4, 3, 6, 0, 2, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_retries_with_backoff_then_fails() {
        let queue = queue(config());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        queue
            .backend()
            .register_fn("flaky", move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(Instant::now());
                    Err::<Value, _>(TaskError::transient("boom"))
                }
            })
            .unwrap();

        let id = queue
            .enqueue("flaky", json!({}), EnqueueOptions::new().max_attempts(3))
            .await
            .unwrap();
        let result = queue.get_result(id, WAIT).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.attempts(), Some(3));
        assert_eq!(result.error().unwrap().message, "boom");

        let calls = calls.lock().clone();
        assert_eq!(calls.len(), 3);
        let slack = Duration::from_millis(100);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_secs(2) + slack);
        assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_secs(4) + slack);

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.failed, stats.retried, stats.pending), (1, 2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_not_run_again() {
        let queue = queue(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        queue
            .backend()
            .register_fn("fatal", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(TaskError::permanent("bad input")) }
            })
            .unwrap();

        let id = queue
            .enqueue("fatal", json!({}), EnqueueOptions::new().max_attempts(5))
            .await
            .unwrap();
        let result = queue.get_result(id, WAIT).await.unwrap();
        assert_eq!(result.attempts(), Some(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_tasks_never_exceed_concurrency() {
        let queue = queue(QueueConfig {
            concurrency: 3,
            ..config()
        });
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (cur, max) = (Arc::clone(&current), Arc::clone(&peak));
        queue
            .backend()
            .register_fn("work", move |_| {
                let (cur, max) = (Arc::clone(&cur), Arc::clone(&max));
                async move {
                    let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    cur.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(Value::Null)
                }
            })
            .unwrap();

        let requests = (0..20).map(|n| EnqueueRequest::new("work", json!({"n": n})));
        let ids = queue.enqueue_batch(requests).await.unwrap();
        for id in ids {
            assert!(queue.get_result(id, WAIT).await.unwrap().is_success());
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.stats().await.unwrap().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_queued_tasks_until_resume() {
        let queue = queue(config());
        queue
            .backend()
            .register_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, TaskError>(json!("done"))
            })
            .unwrap();
        let mut events = queue.subscribe();

        let first = queue.enqueue("slow", json!({}), EnqueueOptions::new()).await.unwrap();
        let second = queue.enqueue("slow", json!({}), EnqueueOptions::new()).await.unwrap();
        let third = queue.enqueue("slow", json!({}), EnqueueOptions::new()).await.unwrap();

        loop {
            if let QueueEvent::Started { task_id, .. } = events.recv().await.unwrap() {
                assert_eq!(task_id, first);
                break;
            }
        }
        queue.pause();

        assert!(queue.get_result(first, WAIT).await.unwrap().is_success());
        tokio::time::sleep(Duration::from_secs(5)).await;
        let stats = queue.stats().await.unwrap();
        assert!(stats.paused);
        assert_eq!((stats.pending, stats.running, stats.completed), (2, 0, 1));
        assert!(queue.get_result(second, None).await.is_none());

        queue.resume();
        assert!(queue.get_result(second, WAIT).await.unwrap().is_success());
        assert!(queue.get_result(third, WAIT).await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_processor_fails_without_retry() {
        let queue = queue(config());
        let id = queue
            .enqueue("nobody", json!({}), EnqueueOptions::new().max_attempts(5))
            .await
            .unwrap();

        let result = queue.get_result(id, WAIT).await.unwrap();
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Configuration);
        assert!(error.message.contains("nobody"));
        assert_eq!(result.attempts(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_processor_retries_when_configured() {
        let queue = queue(QueueConfig {
            retry_missing_processor: true,
            ..config()
        });
        let id = queue
            .enqueue("nobody", json!({}), EnqueueOptions::new().max_attempts(3))
            .await
            .unwrap();

        let result = queue.get_result(id, WAIT).await.unwrap();
        assert_eq!(result.attempts(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_processor_is_a_transient_failure() {
        let queue = queue(config());
        queue
            .backend()
            .register_fn("panics", |payload: Value| async move {
                if payload.is_object() {
                    panic!("processor blew up");
                }
                Ok::<_, TaskError>(Value::Null)
            })
            .unwrap();

        let id = queue
            .enqueue("panics", json!({}), EnqueueOptions::new().max_attempts(2))
            .await
            .unwrap();
        let result = queue.get_result(id, WAIT).await.unwrap();
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Transient);
        assert!(error.message.contains("panicked"));
        assert_eq!(result.attempts(), Some(2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.stats().await.unwrap().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn get_result_timeout_drops_the_waiter() {
        let queue = queue(config());
        queue.pause();
        let id = queue.enqueue("record", json!({}), EnqueueOptions::new()).await.unwrap();

        assert!(queue.get_result(id, None).await.is_none());
        assert!(queue
            .get_result(id, Some(Duration::from_millis(200)))
            .await
            .is_none());
        assert_eq!(queue.inner.results.lock().waiter_count(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn results_expire_after_ttl() {
        let queue = queue(QueueConfig {
            result_ttl_ms: Some(1_000),
            ..config()
        });
        record_order(&queue);
        let id = queue.enqueue("record", json!({"n": 1}), EnqueueOptions::new()).await.unwrap();

        assert!(queue.get_result(id, WAIT).await.is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.get_result(id, None).await.is_none());
        assert_eq!(queue.inner.results.lock().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_not_kept_when_storage_is_off() {
        let queue = queue(QueueConfig {
            store_results: false,
            ..config()
        });
        record_order(&queue);
        queue.pause();
        let id = queue.enqueue("record", json!({"n": 1}), EnqueueOptions::new()).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get_result(id, WAIT).await })
        };
        tokio::task::yield_now().await;
        queue.resume();

        assert!(waiter.await.unwrap().is_some());
        assert!(queue.get_result(id, None).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_for_its_delay() {
        let queue = queue(config());
        let seen = record_order(&queue);
        let id = queue
            .enqueue(
                "record",
                json!({"n": 7}),
                EnqueueOptions::new().delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(seen.lock().is_empty());

        assert!(queue.get_result(id, WAIT).await.is_some());
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_clear_remove_queued_tasks() {
        let queue = queue(config());
        let mut events = queue.subscribe();
        queue.pause();

        let a = queue.enqueue("record", json!({}), EnqueueOptions::new()).await.unwrap();
        queue.enqueue("record", json!({}), EnqueueOptions::new()).await.unwrap();
        queue.enqueue("record", json!({}), EnqueueOptions::new()).await.unwrap();

        assert!(queue.cancel(a).await.unwrap());
        assert!(!queue.cancel(a).await.unwrap());
        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(queue.stats().await.unwrap().pending, 0);

        let mut states = Vec::new();
        let mut cleared = None;
        while let Ok(event) = events.try_recv() {
            if let Some((_, state)) = event.task_state() {
                states.push(state);
            }
            if let QueueEvent::Cleared { removed } = event {
                cleared = Some(removed);
            }
        }
        assert_eq!(states.last(), Some(&TaskState::Cancelled));
        assert_eq!(cleared, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_running_tasks() {
        let queue = queue(config());
        queue
            .backend()
            .register_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, TaskError>(Value::Null)
            })
            .unwrap();
        let mut events = queue.subscribe();
        let id = queue.enqueue("slow", json!({}), EnqueueOptions::new()).await.unwrap();
        while !matches!(events.recv().await.unwrap(), QueueEvent::Started { .. }) {}

        queue.stop().await.unwrap();
        assert!(queue.get_result(id, None).await.unwrap().is_success());
        assert!(matches!(
            queue.enqueue("slow", json!({}), EnqueueOptions::new()).await,
            Err(QueueError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_gives_up_after_timeout() {
        let queue = queue(QueueConfig {
            stop_timeout_ms: Some(1_000),
            ..config()
        });
        queue
            .backend()
            .register_fn("stuck", |_| async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok::<_, TaskError>(Value::Null)
            })
            .unwrap();
        let mut events = queue.subscribe();
        queue.enqueue("stuck", json!({}), EnqueueOptions::new()).await.unwrap();
        while !matches!(events.recv().await.unwrap(), QueueEvent::Started { .. }) {}

        let started = Instant::now();
        let err = queue.stop().await.unwrap_err();
        assert!(matches!(err, QueueError::StopTimeout { in_flight: 1 }));
        assert!(started.elapsed() < Duration::from_secs(2));

        queue.resume();
        assert!(queue.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn typed_jobs_round_trip_through_the_queue() {
        let queue = queue(config());
        queue
            .backend()
            .register_typed::<CountWords, _>(CountWordsHandler)
            .unwrap();

        let job = CountWords {
            text: "one two three".into(),
        };
        let id = queue.enqueue_typed(&job, EnqueueOptions::new()).await.unwrap();
        let result = queue.get_result(id, WAIT).await.unwrap();
        assert_eq!(result.value(), Some(&json!(3)));
        assert_eq!(result.task_type.as_str(), "text.count_words.v1");
    }
}
