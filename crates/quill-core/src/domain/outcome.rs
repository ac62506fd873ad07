//! Task results: what a finished task leaves behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskError, TaskId, TaskType};

/// Terminal outcome of a task. Exactly one of value / error exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        value: serde_json::Value,
    },

    /// `attempts` is the number of executions that ran before giving up.
    Failed {
        error: TaskError,
        attempts: u32,
    },
}

/// Result record for a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub task_type: TaskType,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub completed_at: DateTime<Utc>,

    /// Duration of the final execution.
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn completed(
        task_id: TaskId,
        task_type: TaskType,
        value: serde_json::Value,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id,
            task_type,
            outcome: TaskOutcome::Completed { value },
            completed_at,
            duration_ms,
        }
    }

    pub fn failed(
        task_id: TaskId,
        task_type: TaskType,
        error: TaskError,
        attempts: u32,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id,
            task_type,
            outcome: TaskOutcome::Failed { error, attempts },
            completed_at,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed { .. })
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            TaskOutcome::Completed { value } => Some(value),
            TaskOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            TaskOutcome::Completed { .. } => None,
            TaskOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Executions used; `None` for successful results.
    pub fn attempts(&self) -> Option<u32> {
        match &self.outcome {
            TaskOutcome::Completed { .. } => None,
            TaskOutcome::Failed { attempts, .. } => Some(*attempts),
        }
    }
}
