//! weft-core
//!
//! A distributed map/reduce task queue. Any number of processes share one
//! store; each runs a `Queue` that claims, maps, processes and reduces tasks
//! for the workers it registered. There is no leader and no traffic between
//! processes: all coordination goes through guarded store transactions and
//! lease deadlines.
//!
//! # Modules
//! - **domain**: ids, states, errors, events, status views
//! - **ports**: `SharedStore` and `Clock`
//! - **impls**: `InMemoryStore`
//! - **queue**: `Queue`, configuration, key layout, records, retry policy
//! - **app**: tick loop, lifecycle transitions, watchdog, GC, cron, handles
//! - **typed**: `JobHandler` / `TypedJob` callbacks and the worker registry
//! - **worker**: `WorkerOptions`, `Worker`, `WorkerRef`
//! - **runtime**: lease supervision of running callbacks
//! - **observability**: `init_logging`, `QueueCounts`

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub(crate) mod runtime;
pub mod typed;
pub mod worker;

pub use app::{Chunk, QueueBuilder, Task};
pub use domain::{
    ChunkId, ChunkSets, ChunkState, HandlerError, QueueError, QueueEvent, Stage, TaskId, TaskState,
    TaskStatus,
};
pub use error::{BuildError, ConfigError, RegistrationError};
pub use impls::InMemoryStore;
pub use observability::{LogFormat, QueueCounts, init_logging};
pub use ports::{SharedStore, StoreError};
pub use queue::{Queue, QueueConfig, RetryPolicy};
pub use typed::{JobHandler, Typed, TypedJob};
pub use worker::{WorkerOptions, WorkerRef};
