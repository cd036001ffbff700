//! Task and chunk records as stored in hashes.
//!
//! Every value is a string on the wire: payloads are JSON, counters and
//! timestamps are decimal integers.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::{ChunkSets, TaskState, TaskStatus};
use crate::ports::StoreError;

/// Field names of the `{p}:task:{id}` hash.
pub mod task_field {
    pub const WORKER: &str = "worker";
    pub const DATA: &str = "data";
    pub const STATE: &str = "state";
    pub const RETRIES: &str = "retries";
    pub const DEADLINE: &str = "deadline";
    pub const CHUNKS: &str = "chunks";
    pub const CREATED: &str = "created";
}

/// Field names of the `{p}:chunk:{id}` hash.
pub mod chunk_field {
    pub const DATA: &str = "data";
    pub const RESULT: &str = "result";
    pub const RETRIES: &str = "retries";
}

/// Decoded task hash.
///
/// The record is the single source of truth for a task: state collections
/// only hold ids, and a task without a record does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub worker: String,
    pub data: Value,
    pub state: TaskState,
    /// Failures in the current stage (reset on every stage transition).
    pub retries: u32,
    /// Lease deadline while mapping/reducing.
    pub deadline: Option<i64>,
    /// Number of chunks produced by `map`, once known.
    pub chunks: Option<usize>,
    pub created: i64,
}

impl TaskRecord {
    pub fn new(worker: impl Into<String>, data: Value, state: TaskState, created: i64) -> Self {
        Self {
            worker: worker.into(),
            data,
            state,
            retries: 0,
            deadline: None,
            chunks: None,
            created,
        }
    }

    /// Fields for an `Op::HashSet` writing the whole record.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (task_field::WORKER.to_string(), self.worker.clone()),
            (task_field::DATA.to_string(), self.data.to_string()),
            (task_field::STATE.to_string(), self.state.as_str().to_string()),
            (task_field::RETRIES.to_string(), self.retries.to_string()),
            (task_field::CREATED.to_string(), self.created.to_string()),
        ];
        if let Some(deadline) = self.deadline {
            fields.push((task_field::DEADLINE.to_string(), deadline.to_string()));
        }
        if let Some(chunks) = self.chunks {
            fields.push((task_field::CHUNKS.to_string(), chunks.to_string()));
        }
        fields
    }

    /// Decodes a hash read with `hgetall`. An empty hash means the record is
    /// gone and yields `Ok(None)`.
    pub fn from_hash(
        key: &str,
        hash: &HashMap<String, String>,
    ) -> Result<Option<Self>, StoreError> {
        if hash.is_empty() {
            return Ok(None);
        }
        let required = |field: &str| {
            hash.get(field).ok_or_else(|| corrupt(key, format!("missing field {field}")))
        };

        let worker = required(task_field::WORKER)?.clone();
        let data = serde_json::from_str(required(task_field::DATA)?)
            .map_err(|e| corrupt(key, format!("data: {e}")))?;
        let state = required(task_field::STATE)?
            .parse()
            .map_err(|e| corrupt(key, format!("{e}")))?;

        Ok(Some(Self {
            worker,
            data,
            state,
            retries: parse_opt(key, hash.get(task_field::RETRIES))?.unwrap_or(0),
            deadline: parse_opt(key, hash.get(task_field::DEADLINE))?,
            chunks: parse_opt(key, hash.get(task_field::CHUNKS))?,
            created: parse_opt(key, hash.get(task_field::CREATED))?.unwrap_or(0),
        }))
    }

    pub fn into_status(self, chunks: Option<ChunkSets>) -> TaskStatus {
        let deadline = match self.state {
            TaskState::Mapping | TaskState::Reducing => self.deadline,
            _ => None,
        };
        TaskStatus {
            worker: self.worker,
            state: self.state,
            retries: self.retries,
            deadline,
            chunks,
        }
    }
}

pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parses an optional numeric field.
pub(crate) fn parse_opt<T: std::str::FromStr>(
    key: &str,
    raw: Option<&String>,
) -> Result<Option<T>, StoreError> {
    raw.map(|s| {
        s.parse()
            .map_err(|_| corrupt(key, format!("not a number: {s}")))
    })
    .transpose()
}
