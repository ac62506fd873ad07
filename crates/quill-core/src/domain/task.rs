//! Task record: the unit of deferred work the queue persists.

use std::cmp::{Ordering, Reverse};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A queued unit of work.
///
/// Backends store these as-is. `attempts` counts finished executions, so a
/// task that has never run has `attempts == 0`.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,

    /// Higher runs first.
    pub priority: i32,

    pub created_at: DateTime<Utc>,

    /// Enqueue order; breaks `created_at` ties.
    pub sequence: u64,

    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,

    /// Not eligible for dispatch before this instant.
    pub scheduled_for: Option<Instant>,
}

impl Task {
    /// Is this task eligible for dispatch at `now`?
    pub fn is_due(&self, now: Instant) -> bool {
        self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Attempts left before the task fails terminally.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Dispatch order: priority DESC, then created_at ASC, then sequence ASC.
    pub fn dispatch_cmp(&self, other: &Self) -> Ordering {
        self.dispatch_key().cmp(&other.dispatch_key())
    }

    fn dispatch_key(&self) -> (Reverse<i32>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.created_at, self.sequence)
    }

    /// Record a failed attempt and push the next run out by `delay`.
    pub fn schedule_retry(&mut self, now: Instant, delay: std::time::Duration, error: String) {
        self.scheduled_for = Some(deadline_after(now, delay));
        self.last_error = Some(error);
    }
}

/// `now + delay`, saturating to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: std::time::Duration) -> Instant {
    const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}


#[cfg(test)]
mod tests {
    use super::fixtures::task;
    use super::*;
    use std::time::Duration;

    #[test]
    fn higher_priority_sorts_first() {
        let low = task(1, 0);
        let high = task(10, 1);
        assert_eq!(high.dispatch_cmp(&low), Ordering::Less);
    }

    #[test]
    fn equal_priority_sorts_by_age() {
        let mut older = task(5, 7);
        let mut newer = task(5, 3);
        older.created_at = DateTime::<Utc>::UNIX_EPOCH;
        newer.created_at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1);
        assert_eq!(older.dispatch_cmp(&newer), Ordering::Less);
    }

    #[test]
    fn sequence_breaks_timestamp_ties() {
        let first = task(5, 1);
        let second = task(5, 2);
        assert_eq!(first.dispatch_cmp(&second), Ordering::Less);
    }

    #[test]
    fn delayed_task_is_not_due_until_scheduled() {
        let now = Instant::now();
        let mut t = task(0, 0);
        assert!(t.is_due(now));

        t.schedule_retry(now, Duration::from_secs(2), "boom".into());
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::from_secs(2)));
        assert_eq!(t.last_error.as_deref(), Some("boom"));
    }
}
