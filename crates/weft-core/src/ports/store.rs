//! SharedStore port - the coordination medium shared by every process
//!
//! The store offers hashes, sets, sorted sets, lists, a server clock and one
//! atomic compound primitive, [`SharedStore::transact`]. Every state change
//! the queue makes goes through `transact`: a list of guards that must all
//! hold, followed by a list of operations applied together. That is the
//! compare-and-swap that keeps two processes from claiming the same task.
//!
//! # Implementations
//! - **InMemoryStore** (`impls::memory_store`): single process, tests and demo
//! - A Redis adapter maps `transact` onto one generic Lua script; a SQL
//!   adapter onto a transaction with the guards as `SELECT ... FOR UPDATE`.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a store adapter (transport, protocol, type mismatch).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("key {key} holds a value of another type")]
    WrongType { key: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// A precondition checked inside [`SharedStore::transact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The key does not exist (or has expired).
    KeyAbsent(String),
    HashFieldEquals {
        key: String,
        field: String,
        value: String,
    },
    SetContains {
        key: String,
        member: String,
    },
    /// `score == None` asserts the member is absent from the sorted set.
    ScoreEquals {
        key: String,
        member: String,
        score: Option<i64>,
    },
    ListNotEmpty(String),
    /// The key is absent or the collection stored there has no elements.
    Empty(String),
}

/// A mutation applied by [`SharedStore::transact`] once all guards hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HashDelete {
        key: String,
        fields: Vec<String>,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    ZAdd {
        key: String,
        member: String,
        score: i64,
    },
    ZRemove {
        key: String,
        member: String,
    },
    /// Append to the tail of a list.
    ListPush {
        key: String,
        member: String,
    },
    /// Pop the head of `list` and add it to `zset` with `score`.
    /// The popped member is reported in [`TxnOutcome::Committed`].
    ListPopToZSet {
        list: String,
        zset: String,
        score: i64,
    },
    StringSet {
        key: String,
        value: String,
        expire_at: Option<i64>,
    },
    Delete(String),
}

/// Guards + operations executed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub guards: Vec<Guard>,
    pub ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn then(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn then_all(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.ops.extend(ops);
        self
    }
}

/// Result of [`SharedStore::transact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// All guards held; `popped` lists members moved by `ListPopToZSet`, in op order.
    Committed { popped: Vec<String> },
    /// A guard failed; nothing was written.
    Aborted,
}

impl TxnOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxnOutcome::Committed { .. })
    }
}

/// Operation set the queue needs from a shared key-value store.
///
/// Scores are i64 milliseconds. Reads are plain (non-atomic across keys);
/// anything that changes state must use [`transact`](SharedStore::transact).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Server clock in milliseconds since the epoch.
    async fn now(&self) -> Result<i64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Value of a string key; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn srandmember(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn scard(&self, key: &str) -> Result<usize, StoreError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError>;
    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, i64)>, StoreError>;
    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;

    async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// Run `txn` atomically relative to every other caller of this store.
    async fn transact(&self, txn: Transaction) -> Result<TxnOutcome, StoreError>;
}
