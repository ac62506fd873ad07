//! Handler trait and its type-erased adapter.
//!
//! - `Handler<J>` is the typed surface: it only ever sees `J`.
//! - `TypedProcessor<J, H>` erases the type so it can sit in the
//!   `ProcessorRegistry` next to untyped processors.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::job::Job;
use crate::domain::TaskError;
use crate::impls::Processor;

#[async_trait]
pub trait Handler<J: Job>: Send + Sync {
    async fn handle(&self, job: J) -> Result<J::Output, TaskError>;
}

pub struct TypedProcessor<J: Job, H: Handler<J>> {
    handler: H,
    _marker: PhantomData<J>,
}

impl<J: Job, H: Handler<J>> TypedProcessor<J, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job, H: Handler<J>> Processor for TypedProcessor<J, H> {
    /// Payloads that do not decode as `J` fail permanently: retrying the same
    /// bytes cannot succeed.
    async fn process(&self, payload: &serde_json::Value) -> Result<serde_json::Value, TaskError> {
        let job: J = serde_json::from_value(payload.clone())?;
        let output = self.handler.handle(job).await?;
        Ok(serde_json::to_value(output)?)
    }
}
