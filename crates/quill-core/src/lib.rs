//! quill-core
//!
//! Background task execution and in-process caching.
//!
//! # Modules
//! - **queue**: `TaskQueue` scheduler (priority dispatch, concurrency limit, retry with backoff, results)
//! - **impls**: `InMemoryBackend` and the task_type → processor registry
//! - **cache**: size-bounded LRU `Cache` with expiry, and `MultiLevelCache`
//! - **typed**: typed job API (`Job`, `Handler`)
//! - **domain**: task model, errors, events, retry decisions
//! - **ports**: backend, clock, and id generator traits
//! - **config**: serde configuration for queues and caches
//! - **error**: library error types

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use cache::{Cache, CacheEvent, CacheStats, DisposeReason, MultiLevelCache, SetOptions, Weigh};
pub use config::{CacheConfig, Config, QueueConfig};
pub use domain::{ErrorKind, QueueEvent, TaskError, TaskId, TaskResult, TaskState, TaskType};
pub use error::{CacheError, ConfigError, QueueError};
pub use impls::InMemoryBackend;
pub use queue::{EnqueueOptions, EnqueueRequest, QueueStats, RetryPolicy, TaskQueue};
pub use typed::{Handler, Job};
