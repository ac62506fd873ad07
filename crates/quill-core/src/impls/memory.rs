//! In-memory backend.
//!
//! Tasks live in one `Vec` kept sorted by dispatch order after every insert,
//! so a pop is a linear scan for the first due task. Queues in this
//! application hold tens to hundreds of tasks; a heap keyed on both priority
//! and due time would not pay for itself.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::registry::{Processor, ProcessorRegistry, RegistryError};
use crate::domain::{Task, TaskError, TaskId, TaskType};
use crate::error::QueueError;
use crate::ports::QueueBackend;
use crate::typed::{Handler, Job};

#[derive(Default)]
pub struct InMemoryBackend {
    /// Sorted by `Task::dispatch_cmp`.
    tasks: Mutex<Vec<Task>>,
    processors: RwLock<ProcessorRegistry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        task_type: impl Into<TaskType>,
        processor: Arc<dyn Processor>,
    ) -> Result<(), RegistryError> {
        self.processors.write().register(task_type, processor)
    }

    pub fn register_fn<F, Fut>(
        &self,
        task_type: impl Into<TaskType>,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
    {
        self.processors.write().register_fn(task_type, f)
    }

    pub fn register_typed<J: Job, H: Handler<J> + 'static>(
        &self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.processors.write().register_typed::<J, H>(handler)
    }

    pub fn has_processor(&self, task_type: &TaskType) -> bool {
        self.processors.read().contains(task_type)
    }

    /// Snapshot of stored tasks in dispatch order.
    pub async fn pending_tasks(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }
}

/// Insert keeping dispatch order; equal keys keep insertion order.
fn insert_sorted(tasks: &mut Vec<Task>, task: Task) {
    let idx = tasks.partition_point(|t| t.dispatch_cmp(&task) != Ordering::Greater);
    tasks.insert(idx, task);
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn save_task(&self, task: Task) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().await;
        insert_sorted(&mut tasks, task);
        Ok(())
    }

    async fn next_task(&self, now: Instant) -> Result<Option<Task>, QueueError> {
        let mut tasks = self.tasks.lock().await;
        // not necessarily the head: a delayed high-priority task is skipped
        Ok(tasks
            .iter()
            .position(|t| t.is_due(now))
            .map(|idx| tasks.remove(idx)))
    }

    async fn update_task(&self, task: Task) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| t.id != task.id);
        insert_sorted(&mut tasks, task);
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<bool, QueueError> {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != *id);
        Ok(tasks.len() != before)
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.tasks.lock().await.len())
    }

    async fn clear(&self) -> Result<usize, QueueError> {
        let mut tasks = self.tasks.lock().await;
        let removed = tasks.len();
        tasks.clear();
        Ok(removed)
    }

    async fn process_task(&self, task: &Task) -> Result<serde_json::Value, TaskError> {
        let processor = self
            .processors
            .read()
            .get(&task.task_type)
            .ok_or_else(|| TaskError::missing_processor(&task.task_type))?;

        processor.process(&task.payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::domain::task::fixtures::task;
    use crate::typed::handler::fixtures::{CountWords, CountWordsHandler};
    use serde_json::json;
    use std::time::Duration;

    fn sequences(tasks: &[Task]) -> Vec<u64> {
        tasks.iter().map(|t| t.sequence).collect()
    }

    #[tokio::test]
    async fn stays_sorted_by_priority_then_age() {
        let backend = InMemoryBackend::new();
        backend.save_task(task(1, 0)).await.unwrap();
        backend.save_task(task(5, 1)).await.unwrap();
        backend.save_task(task(5, 2)).await.unwrap();
        backend.save_task(task(9, 3)).await.unwrap();

        assert_eq!(sequences(&backend.pending_tasks().await), vec![3, 1, 2, 0]);
    }

    #[tokio::test]
    async fn next_task_skips_delayed_tasks() {
        let backend = InMemoryBackend::new();
        let now = Instant::now();

        let mut delayed = task(10, 0);
        delayed.scheduled_for = Some(now + Duration::from_secs(5));
        backend.save_task(delayed).await.unwrap();
        backend.save_task(task(1, 1)).await.unwrap();

        let popped = backend.next_task(now).await.unwrap().unwrap();
        assert_eq!(popped.sequence, 1);
        assert!(backend.next_task(now).await.unwrap().is_none());

        let later = now + Duration::from_secs(5);
        let popped = backend.next_task(later).await.unwrap().unwrap();
        assert_eq!(popped.sequence, 0);
    }

    #[tokio::test]
    async fn update_replaces_and_resorts() {
        let backend = InMemoryBackend::new();
        let mut t = task(1, 0);
        backend.save_task(t.clone()).await.unwrap();
        backend.save_task(task(2, 1)).await.unwrap();

        t.priority = 3;
        backend.update_task(t).await.unwrap();

        let pending = backend.pending_tasks().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(sequences(&pending), vec![0, 1]);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let backend = InMemoryBackend::new();
        let t = task(0, 0);
        backend.save_task(t.clone()).await.unwrap();
        backend.save_task(task(0, 1)).await.unwrap();

        assert!(backend.delete_task(&t.id).await.unwrap());
        assert!(!backend.delete_task(&t.id).await.unwrap());
        assert_eq!(backend.pending_count().await.unwrap(), 1);
        assert_eq!(backend.clear().await.unwrap(), 1);
        assert_eq!(backend.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn process_resolves_registered_processor() {
        let backend = InMemoryBackend::new();
        backend
            .register_fn("test", |payload| async move { Ok(json!({ "echo": payload })) })
            .unwrap();

        let out = backend.process_task(&task(0, 4)).await.unwrap();
        assert_eq!(out, json!({ "echo": { "seq": 4 } }));
    }

    #[tokio::test]
    async fn process_without_processor_is_configuration_error() {
        let backend = InMemoryBackend::new();
        let err = backend.process_task(&task(0, 0)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn typed_handlers_register_under_job_type() {
        let backend = InMemoryBackend::new();
        backend.register_typed::<CountWords, _>(CountWordsHandler).unwrap();
        assert!(backend.has_processor(&TaskType::new(CountWords::TYPE)));

        let mut t = task(0, 0);
        t.task_type = TaskType::new(CountWords::TYPE);
        t.payload = json!({ "text": "call me ishmael" });
        assert_eq!(backend.process_task(&t).await.unwrap(), json!(3));
    }
}
