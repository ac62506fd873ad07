//! Bundled backend and processor registry.

pub mod memory;
pub mod registry;

pub use self::memory::InMemoryBackend;
pub use self::registry::{FnProcessor, Processor, ProcessorRegistry, RegistryError};
