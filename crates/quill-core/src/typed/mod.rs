//! Typed job API.
//!
//! Moves the task_type string and the payload shape into the type system:
//! a `Handler<J>` can only be registered under `J::TYPE`, and
//! `TaskQueue::enqueue_typed` can only send a `J`.

pub mod handler;
pub mod job;

pub use self::handler::{Handler, TypedProcessor};
pub use self::job::Job;
