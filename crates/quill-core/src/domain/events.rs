//! Queue notifications.
//!
//! Broadcast to every subscriber of a `TaskQueue`. Per-task completion is
//! delivered separately (see `TaskQueue::get_result`), so nobody has to filter
//! this stream just to wait for one task.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{TaskId, TaskResult, TaskState, TaskType};

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued {
        task_id: TaskId,
        task_type: TaskType,
        priority: i32,
    },
    Started {
        task_id: TaskId,
        task_type: TaskType,
        /// 1-based number of this execution.
        attempt: u32,
    },
    Completed(TaskResult),
    /// Terminal failure; the result carries the last error and the attempt count.
    Failed(TaskResult),
    Retry {
        task_id: TaskId,
        attempts: u32,
        error: String,
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    Cancelled {
        task_id: TaskId,
    },
    Paused,
    Resumed,
    Cleared {
        removed: usize,
    },
    Stopped {
        /// In-flight work was still running when the stop deadline passed.
        forced: bool,
    },
}

impl QueueEvent {
    /// The task this event is about, and the state it moved to.
    pub fn task_state(&self) -> Option<(TaskId, TaskState)> {
        match self {
            QueueEvent::Enqueued { task_id, .. } => Some((*task_id, TaskState::Pending)),
            QueueEvent::Started { task_id, .. } => Some((*task_id, TaskState::Running)),
            QueueEvent::Completed(result) => Some((result.task_id, TaskState::Completed)),
            QueueEvent::Failed(result) => Some((result.task_id, TaskState::Failed)),
            QueueEvent::Retry { task_id, .. } => Some((*task_id, TaskState::RetryScheduled)),
            QueueEvent::Cancelled { task_id } => Some((*task_id, TaskState::Cancelled)),
            QueueEvent::Paused
            | QueueEvent::Resumed
            | QueueEvent::Cleared { .. }
            | QueueEvent::Stopped { .. } => None,
        }
    }

    /// Stable short name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "task-enqueued",
            QueueEvent::Started { .. } => "task-started",
            QueueEvent::Completed(_) => "task-completed",
            QueueEvent::Failed(_) => "task-failed",
            QueueEvent::Retry { .. } => "task-retry",
            QueueEvent::Cancelled { .. } => "task-cancelled",
            QueueEvent::Paused => "queue-paused",
            QueueEvent::Resumed => "queue-resumed",
            QueueEvent::Cleared { .. } => "queue-cleared",
            QueueEvent::Stopped { .. } => "queue-stopped",
        }
    }
}
