//! Configuration for queues and caches.
//!
//! Durations are plain millisecond integers so config files stay readable.
//! Every field has a default; a config file only lists what it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

/// Longest gap between two expiry sweeps of a cache.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,

    /// Period of the background dispatch trigger (picks up delayed tasks).
    pub poll_interval_ms: u64,

    pub default_priority: i32,
    pub default_max_attempts: u32,

    /// Keep results for `get_result` after a task finishes.
    pub store_results: bool,
    pub result_ttl_ms: Option<u64>,

    /// Retry tasks whose type has no processor instead of failing them at once.
    pub retry_missing_processor: bool,

    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: Option<u64>,

    /// How often `stop` checks for in-flight work.
    pub stop_poll_interval_ms: u64,
    /// Give up waiting for in-flight work after this long. `None` waits forever.
    pub stop_timeout_ms: Option<u64>,

    /// Buffer of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_ms: 1_000,
            default_priority: 0,
            default_max_attempts: 3,
            store_results: true,
            result_ttl_ms: Some(60 * 60 * 1_000),
            retry_missing_processor: false,
            backoff_base_ms: 2_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: None,
            stop_poll_interval_ms: 100,
            stop_timeout_ms: Some(30_000),
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl_ms.map(Duration::from_millis)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
            max_delay: self.backoff_max_ms.map(Duration::from_millis),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("queue.concurrency must be at least 1".into()));
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.default_max_attempts must be at least 1".into(),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "queue.backoff_multiplier must be a finite number >= 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("queue.event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity in (estimated) bytes.
    pub max_size: usize,

    /// Default entry lifetime. `None` means entries never expire on their own.
    pub max_age_ms: Option<u64>,

    /// Return expired values from `get` until the sweeper removes them.
    pub stale: bool,

    /// A hit pushes the entry's expiry forward by its max age.
    pub update_age_on_get: bool,

    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 32 * 1024 * 1024,
            max_age_ms: None,
            stale: false,
            update_age_on_get: false,
            event_capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_ms.map(Duration::from_millis)
    }

    /// `min(max_age, 60s)`, never zero.
    pub fn sweep_interval(&self) -> Duration {
        self.max_age()
            .map_or(MAX_SWEEP_INTERVAL, |age| age.min(MAX_SWEEP_INTERVAL))
            .max(Duration::from_millis(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("cache.event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Top-level configuration: one queue and a cache chain (fastest level first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub cache_levels: Vec<CacheConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            cache_levels: vec![
                CacheConfig {
                    max_size: 1024 * 1024,
                    max_age_ms: Some(5 * 60 * 1_000),
                    ..CacheConfig::default()
                },
                CacheConfig {
                    max_size: 32 * 1024 * 1024,
                    max_age_ms: Some(60 * 60 * 1_000),
                    ..CacheConfig::default()
                },
            ],
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        if self.cache_levels.is_empty() {
            return Err(ConfigError::Invalid("cache_levels must not be empty".into()));
        }
        for level in &self.cache_levels {
            level.validate()?;
        }
        Ok(())
    }
}
