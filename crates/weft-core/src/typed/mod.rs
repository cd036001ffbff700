//! Worker callbacks (dynamic and typed) and the worker registry.

pub mod handler;
pub mod registry;

pub use handler::{JobHandler, Typed, TypedJob};
pub use registry::WorkerRegistry;
