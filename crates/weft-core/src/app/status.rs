//! Read side and deletion: status snapshots, cancel, counts.

use tracing::info;

use crate::app::lifecycle::purge_ops;
use crate::domain::{ChunkId, ChunkSets, ChunkState, TaskId, TaskState, TaskStatus};
use crate::observability::QueueCounts;
use crate::ports::{Guard, StoreError, Transaction};
use crate::queue::record::{corrupt, parse_opt, task_field};
use crate::queue::{Core, TaskRecord};

/// Attempts before `delete_task` gives up on a task that keeps changing
/// state under it.
const DELETE_ATTEMPTS: usize = 8;

pub(crate) async fn task_status(
    core: &Core,
    id: &TaskId,
) -> Result<Option<TaskStatus>, StoreError> {
    let key = core.keys.task(id);
    let Some(record) = TaskRecord::from_hash(&key, &core.store.hgetall(&key).await?)? else {
        return Ok(None);
    };
    let chunks = if record.state == TaskState::Aggregating {
        Some(chunk_sets(core, id).await?)
    } else {
        None
    };
    Ok(Some(record.into_status(chunks)))
}

fn parse_chunk_ids(key: &str, members: Vec<String>) -> Result<Vec<ChunkId>, StoreError> {
    members
        .into_iter()
        .map(|member| member.parse::<ChunkId>().map_err(|e| corrupt(key, e.to_string())))
        .collect()
}

async fn scored_members(core: &Core, key: &str) -> Result<Vec<String>, StoreError> {
    Ok(core
        .store
        .zrange_by_score(key, i64::MIN, i64::MAX, None)
        .await?
        .into_iter()
        .map(|(member, _)| member)
        .collect())
}

async fn chunk_sets(core: &Core, id: &TaskId) -> Result<ChunkSets, StoreError> {
    let pending = core.keys.chunks(id, ChunkState::Pending);
    let active = core.keys.chunks(id, ChunkState::Active);
    let errored = core.keys.chunks(id, ChunkState::Errored);
    let done = core.keys.chunks(id, ChunkState::Done);

    let mut sets = ChunkSets {
        pending: parse_chunk_ids(&pending, core.store.lrange(&pending).await?)?,
        active: parse_chunk_ids(&active, scored_members(core, &active).await?)?,
        errored: parse_chunk_ids(&errored, scored_members(core, &errored).await?)?,
        done: parse_chunk_ids(&done, core.store.smembers(&done).await?)?,
    };
    sets.done.sort_by_key(ChunkId::index);
    Ok(sets)
}

pub(crate) async fn cancel(core: &Core, worker: &str, id: &TaskId) -> Result<(), StoreError> {
    if delete_task(core, worker, id).await? {
        info!(worker, task = %id, "task cancelled");
    }
    Ok(())
}

/// Deletes a task and everything it owns, whatever state it is in. The
/// owning worker is read from the record; `worker` is the fallback used to
/// clean up memberships when the record is already gone. Returns whether a
/// record was deleted.
pub(crate) async fn delete_task(
    core: &Core,
    worker: &str,
    id: &TaskId,
) -> Result<bool, StoreError> {
    let key = core.keys.task(id);
    for _ in 0..DELETE_ATTEMPTS {
        let mut fields = core
            .store
            .hmget(&key, &[task_field::WORKER, task_field::STATE, task_field::CHUNKS])
            .await?
            .into_iter();
        let owner = fields.next().flatten();
        let state = fields.next().flatten();
        let chunks = parse_opt(&key, fields.next().flatten().as_ref())?.unwrap_or(0);

        let Some(state) = state else {
            let txn = Transaction::new()
                .when(Guard::KeyAbsent(key.clone()))
                .then_all(purge_ops(core, worker, id, 0));
            core.store.transact(txn).await?;
            return Ok(false);
        };

        let owner = owner.unwrap_or_else(|| worker.to_string());
        // the chunk count only changes together with the state
        let txn = Transaction::new()
            .when(Guard::HashFieldEquals {
                key: key.clone(),
                field: task_field::STATE.to_string(),
                value: state,
            })
            .then_all(purge_ops(core, &owner, id, chunks));
        if core.store.transact(txn).await?.is_committed() {
            return Ok(true);
        }
    }
    Err(StoreError::Unavailable(format!("task {id} kept changing while being deleted")))
}

pub(crate) async fn counts(core: &Core, worker: &str) -> Result<QueueCounts, StoreError> {
    let mut counts = QueueCounts::default();
    for state in TaskState::ALL {
        let key = core.keys.state(worker, state);
        let n = if state.is_scored() {
            core.store.zcard(&key).await?
        } else {
            core.store.scard(&key).await?
        };
        counts.set(state, n);
    }
    Ok(counts)
}
