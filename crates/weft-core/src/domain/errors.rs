//! Errors raised while running worker callbacks.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{ChunkId, TaskId};

/// Error type returned by `map` / `process` / `reduce`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle stage in which a worker callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Mapping,
    Aggregating,
    Reducing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Mapping => "mapping",
            Stage::Aggregating => "aggregating",
            Stage::Reducing => "reducing",
        })
    }
}

fn subject(task_id: &TaskId, chunk_id: &Option<ChunkId>) -> String {
    match chunk_id {
        Some(chunk) => format!("chunk {chunk}"),
        None => format!("task {task_id}"),
    }
}

/// A worker-raised error together with where it happened and what was being
/// processed. Emitted on the queue's event stream, never persisted.
#[derive(Debug, Error)]
#[error("{stage} failed for {}: {source}", subject(.task_id, .chunk_id))]
pub struct QueueError {
    pub stage: Stage,
    pub worker: String,
    pub task_id: TaskId,
    pub chunk_id: Option<ChunkId>,
    /// Input of the failed callback (task data, chunk data or the reduce results).
    pub payload: serde_json::Value,
    pub source: HandlerError,
}
