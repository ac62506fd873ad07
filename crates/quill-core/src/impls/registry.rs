//! Processor registry: task_type -> processor.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{TaskError, TaskType};
use crate::typed::{Handler, Job, TypedProcessor};

/// Does the work for one task type.
///
/// Takes the raw JSON payload; see `typed::Handler` for a typed variant.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, payload: &serde_json::Value) -> Result<serde_json::Value, TaskError>;
}

/// Adapts an async closure into a `Processor`.
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
{
    async fn process(&self, payload: &serde_json::Value) -> Result<serde_json::Value, TaskError> {
        (self.0)(payload.clone()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("processor for task_type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

/// Registry of processors.
///
/// Registering twice for the same type is an error rather than "last wins",
/// so two components cannot silently fight over a task type.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<TaskType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        processor: Arc<dyn Processor>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.processors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.processors.insert(task_type, processor);
        Ok(())
    }

    pub fn register_fn<F, Fut>(
        &mut self,
        task_type: impl Into<TaskType>,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnProcessor::new(f)))
    }

    /// Register a typed handler under `J::TYPE`.
    pub fn register_typed<J: Job, H: Handler<J> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register(J::TYPE, Arc::new(TypedProcessor::<J, H>::new(handler)))
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn Processor>> {
        self.processors.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.processors.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.processors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_processor_runs() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register_fn("echo", |payload| async move { Ok(payload) })
            .unwrap();

        let processor = registry.get(&TaskType::new("echo")).unwrap();
        let out = processor.process(&json!({ "x": 1 })).await.unwrap();
        assert_eq!(out, json!({ "x": 1 }));
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register_fn("echo", |payload| async move { Ok(payload) })
            .unwrap();
        let result = registry.register_fn("echo", |payload| async move { Ok(payload) });
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t.as_str() == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_type_is_absent() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get(&TaskType::new("nope")).is_none());
        assert!(registry.is_empty());
    }
}
