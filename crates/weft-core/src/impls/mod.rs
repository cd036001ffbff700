//! Impls - port implementations
//!
//! # Included
//! - **InMemoryStore**: single-process `SharedStore` (tests, demos, embedding)
//!
//! # Production adapters
//! Adapters for real shared stores live in their own crates. The store port
//! is shaped after Redis (hashes, sets, sorted sets, lists, expiring strings;
//! guarded transactions map onto a Lua script), but anything with
//! multi-key conditional writes can back it.

pub mod memory_store;

pub use self::memory_store::InMemoryStore;
