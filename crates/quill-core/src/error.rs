use std::path::PathBuf;

use thiserror::Error;

/// Errors from queue operations themselves (not from the tasks they run).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue is stopped")]
    Stopped,

    #[error("stop timed out with {in_flight} task(s) still running")]
    StopTimeout { in_flight: usize },

    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("a multi-level cache needs at least one level")]
    NoLevels,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
