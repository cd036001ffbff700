//! Worker callbacks.
//!
//! `JobHandler` is the object-safe trait the queue stores and calls, working
//! on `serde_json::Value`. `TypedJob` is the same contract with concrete
//! payload types; wrap it in `Typed` to get a `JobHandler`.
//!
//! ```ignore
//! struct Sum;
//!
//! #[async_trait]
//! impl TypedJob for Sum {
//!     type Input = Vec<i64>;
//!     type Item = i64;
//!     type Output = i64;
//!
//!     async fn map(&self, _task: &Task, input: Vec<i64>) -> Result<Vec<i64>, HandlerError> {
//!         Ok(input)
//!     }
//!
//!     async fn process(&self, _chunk: &Chunk, n: i64) -> Result<i64, HandlerError> {
//!         Ok(n * n)
//!     }
//! }
//!
//! queue.register_worker(WorkerOptions::new("sum"), Typed(Sum))?;
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::handle::{Chunk, Task};
use crate::domain::{HandlerError, TaskId};

/// Callbacks of one worker.
///
/// Every callback may run concurrently on several processes and may be
/// re-run after a crash or a lease expiry, so all of them should be
/// idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Splits task data into chunk payloads. Defaults to one chunk carrying
    /// the data unchanged. An empty vector goes straight to `reduce`.
    async fn map(&self, _task: &Task, data: Value) -> Result<Vec<Value>, HandlerError> {
        Ok(vec![data])
    }

    /// Processes one chunk.
    async fn process(&self, chunk: &Chunk, data: Value) -> Result<Value, HandlerError>;

    /// Combines the results of the chunks that finished. Chunks dropped after
    /// exhausting their retries are missing from `results`.
    async fn reduce(&self, _task: &Task, _results: Vec<Value>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Derives a task id from the payload. Pushing data that maps to the id
    /// of an existing task is a no-op.
    fn task_id(&self, _data: &Value) -> Option<TaskId> {
        None
    }
}

/// Typed flavour of `JobHandler`.
#[async_trait]
pub trait TypedJob: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Item: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    async fn map(&self, task: &Task, input: Self::Input) -> Result<Vec<Self::Item>, HandlerError>;

    async fn process(&self, chunk: &Chunk, item: Self::Item) -> Result<Self::Output, HandlerError>;

    async fn reduce(&self, _task: &Task, _results: Vec<Self::Output>) -> Result<(), HandlerError> {
        Ok(())
    }

    fn task_id(&self, _input: &Self::Input) -> Option<TaskId> {
        None
    }
}

/// Adapter turning a `TypedJob` into a `JobHandler`.
///
/// Payloads that do not decode into the job's types fail the callback like
/// any other error (and are retried, then dropped).
pub struct Typed<J>(pub J);

#[async_trait]
impl<J: TypedJob> JobHandler for Typed<J> {
    async fn map(&self, task: &Task, data: Value) -> Result<Vec<Value>, HandlerError> {
        let input: J::Input = serde_json::from_value(data)?;
        let items = self.0.map(task, input).await?;
        items
            .iter()
            .map(|item| serde_json::to_value(item).map_err(HandlerError::from))
            .collect()
    }

    async fn process(&self, chunk: &Chunk, data: Value) -> Result<Value, HandlerError> {
        let item: J::Item = serde_json::from_value(data)?;
        let output = self.0.process(chunk, item).await?;
        Ok(serde_json::to_value(output)?)
    }

    async fn reduce(&self, task: &Task, results: Vec<Value>) -> Result<(), HandlerError> {
        let results = results
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<J::Output>, _>>()?;
        self.0.reduce(task, results).await
    }

    fn task_id(&self, data: &Value) -> Option<TaskId> {
        let input: J::Input = serde_json::from_value(data.clone()).ok()?;
        self.0.task_id(&input)
    }
}
