//! Domain identifiers.
//!
//! Task ids are plain strings because callers may choose them (a worker's
//! `task_id` function turns payloads into ids to get exclusivity). Generated
//! ids are ULIDs: sortable by creation time and safe to mint on any node
//! without coordination.
//!
//! Chunk ids are derived, `<task-id>:<index>`, so a chunk id alone is enough
//! to find its owning task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a Task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id (ULID).
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the `index`-th chunk produced by this task's `map`.
    pub fn chunk(&self, index: usize) -> ChunkId {
        ChunkId {
            task: self.clone(),
            index,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a Chunk: owning task + position in the `map` output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChunkId {
    task: TaskId,
    index: usize,
}

impl ChunkId {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed chunk id: {0}")]
pub struct ChunkIdError(String);

impl FromStr for ChunkId {
    type Err = ChunkIdError;

    // task ids may themselves contain ':' so split on the last one
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (task, index) = s
            .rsplit_once(':')
            .ok_or_else(|| ChunkIdError(s.to_string()))?;
        let index = index.parse().map_err(|_| ChunkIdError(s.to_string()))?;
        if task.is_empty() {
            return Err(ChunkIdError(s.to_string()));
        }
        Ok(TaskId::new(task).chunk(index))
    }
}

impl TryFrom<String> for ChunkId {
    type Error = ChunkIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn generated_ids_are_unique_and_sortable() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();

        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn chunk_id_display() {
        let chunk = TaskId::new("sum").chunk(2);
        assert_eq!(chunk.to_string(), "sum:2");
        assert_eq!(chunk.task().as_str(), "sum");
        assert_eq!(chunk.index(), 2);
    }

    #[rstest]
    #[case::plain("t1:0", "t1", 0)]
    #[case::colon_in_task("user:42:17", "user:42", 17)]
    fn chunk_id_parses(#[case] raw: &str, #[case] task: &str, #[case] index: usize) {
        let id: ChunkId = raw.parse().unwrap();
        assert_eq!(id.task().as_str(), task);
        assert_eq!(id.index(), index);
    }

    #[rstest]
    #[case::no_colon("t1")]
    #[case::bad_index("t1:x")]
    #[case::no_task(":3")]
    fn chunk_id_rejects(#[case] raw: &str) {
        assert!(raw.parse::<ChunkId>().is_err());
    }

    #[test]
    fn chunk_id_serializes_as_string() {
        let id = TaskId::new("a").chunk(1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a:1\"");
    }
}
