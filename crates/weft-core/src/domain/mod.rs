//! Domain model (ids, states, errors, events, status views).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod status;

pub use errors::{HandlerError, QueueError, Stage};
pub use events::{EventError, QueueEvent};
pub use ids::{ChunkId, ChunkIdError, TaskId};
pub use state::{ChunkState, TaskState, UnknownState};
pub use status::{ChunkSets, TaskStatus};
