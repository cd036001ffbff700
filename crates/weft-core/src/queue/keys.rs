//! Store key layout.
//!
//! ```text
//! {p}:task:{id}                  hash   worker, data, state, retries, deadline, chunks, created
//! {p}:worker:{name}:{state}      set / zset of task ids per lifecycle state
//! {p}:chunks:{id}:{chunk-state}  list (pending) / zset (active, errored) / set (done)
//! {p}:chunk:{chunk-id}           hash   data, result, retries
//! {p}:workers                    zset   worker name -> last seen
//! {p}:cron:{name}:{tick-ms}      string with expiry
//! ```
//!
//! Task ids are caller-chosen and may contain `:`, so every key that embeds
//! one either ends with it or with a fixed suffix, and task records and
//! chunk collections live under different namespaces.

use crate::domain::{ChunkId, ChunkState, TaskId, TaskState};

#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn task(&self, id: &TaskId) -> String {
        format!("{}:task:{}", self.prefix, id)
    }

    pub fn state(&self, worker: &str, state: TaskState) -> String {
        format!("{}:worker:{}:{}", self.prefix, worker, state.as_str())
    }

    pub fn chunks(&self, id: &TaskId, state: ChunkState) -> String {
        format!("{}:chunks:{}:{}", self.prefix, id, state.as_str())
    }

    pub fn chunk(&self, id: &ChunkId) -> String {
        format!("{}:chunk:{}", self.prefix, id)
    }

    pub fn workers(&self) -> String {
        format!("{}:workers", self.prefix)
    }

    pub fn cron(&self, worker: &str, tick_ms: i64) -> String {
        format!("{}:cron:{}:{}", self.prefix, worker, tick_ms)
    }
}
