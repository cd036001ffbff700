//! Task and chunk states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TaskState is the lifecycle position of a task record.
///
/// State transitions:
/// - Postponed -> Pending (due time reached)
/// - Pending -> Mapping (claimed by a process)
/// - Mapping -> Aggregating (map succeeded, chunks created)
/// - Aggregating -> Reducing (no pending/active/errored chunks left)
/// - Reducing -> (deleted) on success
///
/// There is no terminal variant: a finished, cancelled or dropped task simply
/// has no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Postponed,
    Pending,
    Mapping,
    Aggregating,
    Reducing,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Postponed,
        TaskState::Pending,
        TaskState::Mapping,
        TaskState::Aggregating,
        TaskState::Reducing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Postponed => "postponed",
            TaskState::Pending => "pending",
            TaskState::Mapping => "mapping",
            TaskState::Aggregating => "aggregating",
            TaskState::Reducing => "reducing",
        }
    }

    /// States whose collection is a sorted set scored by deadline / due time.
    pub fn is_scored(self) -> bool {
        matches!(
            self,
            TaskState::Postponed | TaskState::Mapping | TaskState::Reducing
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for TaskState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Which per-task collection a chunk sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Active,
    Errored,
    Done,
}

impl ChunkState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Active => "active",
            ChunkState::Errored => "errored",
            ChunkState::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip_through_str() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("deleted".parse::<TaskState>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let s = serde_json::to_string(&TaskState::Aggregating).unwrap();
        assert_eq!(s, "\"aggregating\"");
    }
}
