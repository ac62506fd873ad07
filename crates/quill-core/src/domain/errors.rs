//! Execution errors reported by processors.
//!
//! These are data, not control flow: the scheduler stores them on the task
//! (`last_error`) and in the failure result instead of handing them back to
//! whoever enqueued the work.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TaskType;

/// Classification of an execution failure.
///
/// - Transient: worth retrying with backoff.
/// - Permanent: retrying cannot help (bad payload, rejected input).
/// - Configuration: the queue itself is misconfigured (no processor for the type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Configuration,
}

/// Error produced by one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn missing_processor(task_type: &TaskType) -> Self {
        Self::new(
            ErrorKind::Configuration,
            format!("no processor registered for task_type={task_type}"),
        )
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_message() {
        let err = TaskError::transient("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[test]
    fn missing_processor_is_configuration_error() {
        let err = TaskError::missing_processor(&TaskType::new("outline.generate"));
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("outline.generate"));
    }

    #[test]
    fn json_errors_are_permanent() {
        let err: TaskError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }
}
