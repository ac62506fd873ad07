//! QueueBackend port - storage and execution hooks behind a `TaskQueue`.
//!
//! The scheduler owns ordering policy, retries, results, and concurrency; a
//! backend only stores tasks and runs them. `InMemoryBackend` is the bundled
//! implementation; a database-backed one would implement the same trait.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{Task, TaskError, TaskId};
use crate::error::QueueError;

#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Persist a newly enqueued task.
    async fn save_task(&self, task: Task) -> Result<(), QueueError>;

    /// Atomically remove and return the next task eligible at `now`.
    ///
    /// Order is priority DESC, created_at ASC; tasks whose `scheduled_for` is
    /// still in the future are skipped. Concurrent callers must never receive
    /// the same task.
    async fn next_task(&self, now: Instant) -> Result<Option<Task>, QueueError>;

    /// Put a task (typically one rescheduled for retry) back into the
    /// eligible set, replacing any stored copy with the same id.
    async fn update_task(&self, task: Task) -> Result<(), QueueError>;

    /// Remove a stored task. Returns `false` if it was not stored, which is
    /// the normal case for a task that was already popped.
    async fn delete_task(&self, id: &TaskId) -> Result<bool, QueueError>;

    /// Number of stored (not in-flight) tasks.
    async fn pending_count(&self) -> Result<usize, QueueError>;

    /// Remove every stored task, returning how many were removed.
    async fn clear(&self) -> Result<usize, QueueError>;

    /// Do the actual work.
    async fn process_task(&self, task: &Task) -> Result<serde_json::Value, TaskError>;
}
