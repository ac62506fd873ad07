//! Domain model (ids, tasks, results, errors, events, decisions).

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, TaskError};
pub use events::QueueEvent;
pub use ids::TaskId;
pub use outcome::{TaskOutcome, TaskResult};
pub use state::TaskState;
pub use task::{Task, TaskType};
