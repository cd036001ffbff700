//! Handles given to worker callbacks.
//!
//! A handle is bound to one record (a task, or one chunk of a task) and to
//! the lease under which the callback runs. Callbacks that need more time
//! than the worker's `timeout` call `extend` before the lease runs out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::domain::{ChunkId, ChunkState, HandlerError, TaskId, TaskState};
use crate::ports::{Guard, Op, StoreError, Transaction};
use crate::queue::{Core, duration_ms};
use crate::queue::record::task_field;
use crate::runtime::Lease;
use crate::worker::Worker;

/// A task being mapped or reduced.
pub struct Task {
    core: Arc<Core>,
    worker: Arc<Worker>,
    id: TaskId,
    state: TaskState,
    lease: Arc<Lease>,
}

impl Task {
    pub(crate) fn new(
        core: Arc<Core>,
        worker: Arc<Worker>,
        id: TaskId,
        state: TaskState,
        lease: Arc<Lease>,
    ) -> Self {
        Self {
            core,
            worker,
            id,
            state,
            lease,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn worker(&self) -> &str {
        self.worker.name()
    }

    /// `Mapping` or `Reducing`.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Current lease deadline in store-clock milliseconds.
    pub fn deadline(&self) -> i64 {
        self.lease.deadline()
    }

    /// Pushes the lease deadline to `now + by`. Returns false if the task is
    /// no longer held under this lease (it expired and was taken over, or
    /// was cancelled).
    pub async fn extend(&self, by: Duration) -> Result<bool, StoreError> {
        let current = self.lease.deadline();
        let next = self.core.store.now().await?.saturating_add(duration_ms(by));
        let key = self.core.keys.state(self.worker.name(), self.state);
        let txn = Transaction::new()
            .when(Guard::ScoreEquals {
                key: key.clone(),
                member: self.id.to_string(),
                score: Some(current),
            })
            .then(Op::ZAdd {
                key,
                member: self.id.to_string(),
                score: next,
            })
            .then(Op::HashSet {
                key: self.core.keys.task(&self.id),
                fields: vec![(task_field::DEADLINE.to_string(), next.to_string())],
            });
        let extended = self.core.store.transact(txn).await?.is_committed()
            && self.lease.advance(current, next);
        debug!(
            worker = %self.worker(),
            task = %self.id,
            extended,
            deadline = next,
            "task lease extension"
        );
        Ok(extended)
    }

    pub(crate) async fn map(&self, data: Value) -> Result<Vec<Value>, HandlerError> {
        self.worker.handler().map(self, data).await
    }

    pub(crate) async fn reduce(&self, results: Vec<Value>) -> Result<(), HandlerError> {
        self.worker.handler().reduce(self, results).await
    }
}

/// One chunk being processed.
pub struct Chunk {
    core: Arc<Core>,
    worker: Arc<Worker>,
    id: ChunkId,
    lease: Arc<Lease>,
}

impl Chunk {
    pub(crate) fn new(
        core: Arc<Core>,
        worker: Arc<Worker>,
        id: ChunkId,
        lease: Arc<Lease>,
    ) -> Self {
        Self {
            core,
            worker,
            id,
            lease,
        }
    }

    pub fn id(&self) -> &ChunkId {
        &self.id
    }

    pub fn task_id(&self) -> &TaskId {
        self.id.task()
    }

    pub fn worker(&self) -> &str {
        self.worker.name()
    }

    pub fn deadline(&self) -> i64 {
        self.lease.deadline()
    }

    /// Pushes the chunk lease deadline to `now + by`. Returns false if the
    /// chunk is no longer active under this lease.
    pub async fn extend(&self, by: Duration) -> Result<bool, StoreError> {
        let current = self.lease.deadline();
        let next = self.core.store.now().await?.saturating_add(duration_ms(by));
        let key = self.core.keys.chunks(self.id.task(), ChunkState::Active);
        let txn = Transaction::new()
            .when(Guard::ScoreEquals {
                key: key.clone(),
                member: self.id.to_string(),
                score: Some(current),
            })
            .then(Op::ZAdd {
                key,
                member: self.id.to_string(),
                score: next,
            });
        let extended = self.core.store.transact(txn).await?.is_committed()
            && self.lease.advance(current, next);
        debug!(
            worker = %self.worker(),
            chunk = %self.id,
            extended,
            deadline = next,
            "chunk lease extension"
        );
        Ok(extended)
    }

    pub(crate) async fn process(&self, data: Value) -> Result<Value, HandlerError> {
        self.worker.handler().process(self, data).await
    }
}
