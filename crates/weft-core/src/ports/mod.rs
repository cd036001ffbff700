//! Ports - abstraction layer
//!
//! Each trait here is the seam to something outside the process: the shared
//! store every coordinator talks to and the clock it falls back on.
//!
//! # Design principles
//! - The shared store is the only coordination medium (no process-to-process traffic)
//! - Every state transition is one conditional transaction
//! - Lease deadlines come from the store clock, never from local clocks

pub mod clock;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::store::{Guard, Op, SharedStore, StoreError, Transaction, TxnOutcome};
