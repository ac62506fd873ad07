//! Ports - the seams between the scheduler and the outside world.

pub mod backend;
pub mod clock;
pub mod id_generator;

pub use self::backend::QueueBackend;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
