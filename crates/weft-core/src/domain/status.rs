//! Read-only snapshots returned by `WorkerRef::status`.

use serde::{Deserialize, Serialize};

use super::ids::ChunkId;
use super::state::TaskState;

/// Serializable view of one task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub worker: String,
    pub state: TaskState,
    pub retries: u32,
    /// Lease deadline (mapping/reducing) in store-clock milliseconds.
    pub deadline: Option<i64>,
    /// Only filled in while the task is aggregating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<ChunkSets>,
}

/// Chunk ids per collection of an aggregating task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSets {
    pub pending: Vec<ChunkId>,
    pub active: Vec<ChunkId>,
    pub errored: Vec<ChunkId>,
    pub done: Vec<ChunkId>,
}

impl ChunkSets {
    pub fn total(&self) -> usize {
        self.pending.len() + self.active.len() + self.errored.len() + self.done.len()
    }
}
