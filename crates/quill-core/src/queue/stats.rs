use serde::{Deserialize, Serialize};

/// Snapshot of queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Stored and waiting (including tasks in backoff).
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    /// Retries scheduled so far.
    pub retried: u64,
    pub paused: bool,
}
