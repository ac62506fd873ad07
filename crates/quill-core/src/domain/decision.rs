//! Decision model: what happens to a task after a failed attempt.
//!
//! Deciders are pure: given the task (with `attempts` already counting the
//! failed run) and the error, they return the next action. Applying it is the
//! scheduler's job.

use std::time::Duration;

use super::{ErrorKind, Task, TaskError};
use crate::queue::RetryPolicy;

/// The next action for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up; the task fails terminally.
    Fail { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &Task, error: &TaskError) -> Decision;
}

/// Attempt-budget decider with exponential backoff.
///
/// - Permanent errors fail immediately.
/// - Configuration errors fail immediately unless `retry_configuration_errors` is set.
/// - Otherwise retry while `attempts < max_attempts`.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    retry_configuration_errors: bool,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            retry_configuration_errors: false,
        }
    }

    pub fn retry_configuration_errors(mut self, retry: bool) -> Self {
        self.retry_configuration_errors = retry;
        self
    }

    fn is_retryable(&self, error: &TaskError) -> bool {
        match error.kind {
            ErrorKind::Transient => true,
            ErrorKind::Permanent => false,
            ErrorKind::Configuration => self.retry_configuration_errors,
        }
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &Task, error: &TaskError) -> Decision {
        if !self.is_retryable(error) {
            return Decision::Fail {
                reason: format!("{:?} error is not retried", error.kind),
            };
        }
        if task.attempts >= task.max_attempts {
            return Decision::Fail {
                reason: format!(
                    "max attempts reached: {}/{}",
                    task.attempts, task.max_attempts
                ),
            };
        }

        let delay = self.retry_policy.next_delay(task.attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                task.attempts + 1,
                task.max_attempts,
                delay
            ),
        }
    }
}
