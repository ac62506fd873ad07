//! Task state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of a task.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> RetryScheduled -> Pending (until max_attempts)
/// - Pending -> Running -> Failed
/// - Pending -> Cancelled (removed before dispatch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a dispatch pass.
    Pending,

    /// Currently executing.
    Running,

    /// Waiting out a backoff delay.
    RetryScheduled,

    Completed,

    /// Attempts exhausted, or a non-retryable error.
    Failed,

    /// Removed from the queue before it ran.
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Can a dispatch pass pick this task up?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Pending)
    }
}
