//! App - the coordinator's moving parts
//!
//! - **builder**: `QueueBuilder`
//! - **handle**: `Task` / `Chunk` handles passed to callbacks
//! - **lifecycle**: enqueue, map, aggregate, reduce transitions
//! - **worker_loop**: the tick loop (promotion, claims)
//! - **reaper_loop**: lease watchdog for mapping/reducing
//! - **gc_loop**: liveness GC of abandoned workers
//! - **cron**: cron timers with cluster-wide dedup
//! - **status**: status snapshots, cancel, counts

pub mod builder;
pub(crate) mod cron;
pub(crate) mod gc_loop;
pub mod handle;
pub(crate) mod lifecycle;
pub(crate) mod reaper_loop;
pub(crate) mod status;
pub(crate) mod worker_loop;

pub use self::builder::QueueBuilder;
pub use self::handle::{Chunk, Task};
