//! Lifecycle transitions of tasks and chunks.
//!
//! Every transition is a single guarded transaction. The guard pins what the
//! transition was computed from (set membership, lease deadline), so a
//! process acting on a stale read aborts instead of overwriting newer state.
//! That is the whole concurrency story: no locks, no leader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::handle::{Chunk, Task};
use crate::domain::{ChunkId, ChunkState, QueueError, Stage, TaskId, TaskState};
use crate::ports::{Guard, Op, StoreError, Transaction, TxnOutcome};
use crate::queue::record::{chunk_field, corrupt, parse_opt, task_field};
use crate::queue::{Core, TaskRecord, duration_ms};
use crate::runtime::{Lease, supervise};
use crate::worker::Worker;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Creates a task record in `pending` (or `postponed` when delayed). A task
/// whose id already exists is left untouched.
pub(crate) async fn enqueue(
    core: &Core,
    worker: &Worker,
    data: Value,
    delay: Option<Duration>,
) -> Result<TaskId, StoreError> {
    let id = worker.handler().task_id(&data).unwrap_or_else(TaskId::generate);
    let now = core.store.now().await?;
    let member = id.to_string();

    let (state, membership) = match delay {
        None => (
            TaskState::Pending,
            Op::SetAdd {
                key: core.keys.state(worker.name(), TaskState::Pending),
                member,
            },
        ),
        Some(delay) => (
            TaskState::Postponed,
            Op::ZAdd {
                key: core.keys.state(worker.name(), TaskState::Postponed),
                member,
                score: now.saturating_add(duration_ms(delay)),
            },
        ),
    };
    let record = TaskRecord::new(worker.name(), data, state, now);
    let key = core.keys.task(&id);
    let txn = Transaction::new()
        .when(Guard::KeyAbsent(key.clone()))
        .then(Op::HashSet {
            key,
            fields: record.to_fields(),
        })
        .then(membership);

    if core.store.transact(txn).await?.is_committed() {
        debug!(worker = %worker.name(), task = %id, %state, "task enqueued");
    } else {
        debug!(worker = %worker.name(), task = %id, "task already exists; enqueue ignored");
    }
    Ok(id)
}

/// Ops deleting a task, its membership in every state collection, its
/// chunk collections and its first `chunks` chunk records.
pub(crate) fn purge_ops(core: &Core, worker: &str, id: &TaskId, chunks: usize) -> Vec<Op> {
    let member = id.to_string();
    let mut ops: Vec<Op> = TaskState::ALL
        .into_iter()
        .map(|state| {
            let key = core.keys.state(worker, state);
            let member = member.clone();
            if state.is_scored() {
                Op::ZRemove { key, member }
            } else {
                Op::SetRemove { key, member }
            }
        })
        .collect();
    ops.push(Op::Delete(core.keys.task(id)));
    for state in [
        ChunkState::Pending,
        ChunkState::Active,
        ChunkState::Errored,
        ChunkState::Done,
    ] {
        ops.push(Op::Delete(core.keys.chunks(id, state)));
    }
    ops.extend((0..chunks).map(|index| Op::Delete(core.keys.chunk(&id.chunk(index)))));
    ops
}

async fn read_json(core: &Core, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
    core.store
        .hget(key, field)
        .await?
        .map(|raw| serde_json::from_str(&raw).map_err(|e| corrupt(key, format!("{field}: {e}"))))
        .transpose()
}

/// Moves `state`'s deadline to `now + retry_delay`, provided the task is
/// still held under `expected`. The watchdog restarts it once that passes.
async fn rearm(
    core: &Core,
    worker: &Worker,
    id: &TaskId,
    state: TaskState,
    expected: i64,
) -> Result<(), StoreError> {
    let key = core.keys.state(worker.name(), state);
    let next = core.store.now().await?.saturating_add(worker.policy().delay_ms());
    let txn = Transaction::new()
        .when(Guard::ScoreEquals {
            key: key.clone(),
            member: id.to_string(),
            score: Some(expected),
        })
        .then(Op::ZAdd {
            key,
            member: id.to_string(),
            score: next,
        })
        .then(Op::HashSet {
            key: core.keys.task(id),
            fields: vec![(task_field::DEADLINE.to_string(), next.to_string())],
        });
    if core.store.transact(txn).await?.is_committed() {
        debug!(
            worker = %worker.name(),
            task = %id,
            %state,
            retry_at = next,
            "task will be retried"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// map

/// Runs `map` for a task this process just claimed (or restarted) under the
/// lease ending at `deadline`.
pub(crate) async fn run_map(core: Arc<Core>, worker: Arc<Worker>, id: TaskId, deadline: i64) {
    let data = match read_json(&core, &core.keys.task(&id), task_field::DATA).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!(worker = %worker.name(), task = %id, "task vanished before map");
            return;
        }
        Err(err) => {
            core.report_store(err);
            return;
        }
    };

    let lease = Arc::new(Lease::new(deadline));
    let task = Task::new(
        Arc::clone(&core),
        Arc::clone(&worker),
        id.clone(),
        TaskState::Mapping,
        Arc::clone(&lease),
    );
    let work = tokio::spawn({
        let core = Arc::clone(&core);
        let worker = Arc::clone(&worker);
        async move {
            let result = match task.map(data.clone()).await {
                Ok(items) => finish_map(&core, &worker, task.id(), task.deadline(), items).await,
                Err(source) => {
                    core.report_worker(QueueError {
                        stage: Stage::Mapping,
                        worker: worker.name().to_string(),
                        task_id: task.id().clone(),
                        chunk_id: None,
                        payload: data,
                        source,
                    });
                    rearm(&core, &worker, task.id(), TaskState::Mapping, task.deadline()).await
                }
            };
            if let Err(err) = result {
                core.report_store(err);
            }
        }
    });

    if !supervise(&core, &lease, work).await {
        warn!(worker = %worker.name(), task = %id, "map outlived its lease");
    }
}

/// Stores the chunks produced by `map` and moves the task to aggregating,
/// then starts aggregating it right here.
async fn finish_map(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
    id: &TaskId,
    deadline: i64,
    items: Vec<Value>,
) -> Result<(), StoreError> {
    let member = id.to_string();
    let mapping = core.keys.state(worker.name(), TaskState::Mapping);
    let pending = core.keys.chunks(id, ChunkState::Pending);
    let chunks = items.len();

    let mut txn = Transaction::new().when(Guard::ScoreEquals {
        key: mapping.clone(),
        member: member.clone(),
        score: Some(deadline),
    });
    for (index, item) in items.into_iter().enumerate() {
        let chunk = id.chunk(index);
        txn = txn
            .then(Op::HashSet {
                key: core.keys.chunk(&chunk),
                fields: vec![
                    (chunk_field::DATA.to_string(), item.to_string()),
                    (chunk_field::RETRIES.to_string(), "0".to_string()),
                ],
            })
            .then(Op::ListPush {
                key: pending.clone(),
                member: chunk.to_string(),
            });
    }
    let txn = txn
        .then(Op::ZRemove {
            key: mapping,
            member: member.clone(),
        })
        .then(Op::SetAdd {
            key: core.keys.state(worker.name(), TaskState::Aggregating),
            member,
        })
        .then(Op::HashSet {
            key: core.keys.task(id),
            fields: vec![
                (task_field::STATE.to_string(), TaskState::Aggregating.to_string()),
                (task_field::RETRIES.to_string(), "0".to_string()),
                (task_field::CHUNKS.to_string(), chunks.to_string()),
            ],
        })
        .then(Op::HashDelete {
            key: core.keys.task(id),
            fields: vec![task_field::DEADLINE.to_string()],
        });

    if !core.store.transact(txn).await?.is_committed() {
        debug!(worker = %worker.name(), task = %id, "map result discarded; lease lost");
        return Ok(());
    }
    info!(worker = %worker.name(), task = %id, chunks, "task mapped");
    aggregate(Arc::clone(core), Arc::clone(worker), id.clone()).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// aggregate

/// One aggregation pass over an aggregating task: recover expired and due
/// chunks, claim as many pending chunks as the local cap allows, and move
/// the task to reducing once nothing is left to process.
///
/// Boxed because chunk completion starts another pass.
pub(crate) fn aggregate(core: Arc<Core>, worker: Arc<Worker>, id: TaskId) -> BoxFuture<()> {
    Box::pin(async move {
        if let Err(err) = aggregate_pass(&core, &worker, &id).await {
            core.report_store(err);
        }
    })
}

async fn aggregate_pass(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
    id: &TaskId,
) -> Result<(), StoreError> {
    let now = core.store.now().await?;
    let pending = core.keys.chunks(id, ChunkState::Pending);
    let active = core.keys.chunks(id, ChunkState::Active);
    let errored = core.keys.chunks(id, ChunkState::Errored);

    for (member, score) in core.store.zrange_by_score(&active, i64::MIN, now, None).await? {
        settle_failed_chunk(core, worker, id, &member, score, Requeue::Pending).await?;
    }
    for (member, score) in core.store.zrange_by_score(&errored, i64::MIN, now, None).await? {
        let txn = Transaction::new()
            .when(Guard::ScoreEquals {
                key: errored.clone(),
                member: member.clone(),
                score: Some(score),
            })
            .then(Op::ZRemove {
                key: errored.clone(),
                member: member.clone(),
            })
            .then(Op::ListPush {
                key: pending.clone(),
                member,
            });
        core.store.transact(txn).await?;
    }

    claim_chunks(core, worker, id).await?;

    if core.store.llen(&pending).await? == 0
        && core.store.zcard(&active).await? == 0
        && core.store.zcard(&errored).await? == 0
    {
        begin_reduce(core, worker, id).await?;
    }
    Ok(())
}

async fn claim_chunks(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
    id: &TaskId,
) -> Result<(), StoreError> {
    let aggregating = core.keys.state(worker.name(), TaskState::Aggregating);
    let pending = core.keys.chunks(id, ChunkState::Pending);
    let active = core.keys.chunks(id, ChunkState::Active);
    let deadline = core.store.now().await?.saturating_add(worker.policy().lease_ms());

    while worker.try_reserve(id) {
        let txn = Transaction::new()
            .when(Guard::SetContains {
                key: aggregating.clone(),
                member: id.to_string(),
            })
            .when(Guard::ListNotEmpty(pending.clone()))
            .then(Op::ListPopToZSet {
                list: pending.clone(),
                zset: active.clone(),
                score: deadline,
            });
        let popped = match core.store.transact(txn).await {
            Ok(TxnOutcome::Committed { popped }) => popped.into_iter().next(),
            Ok(TxnOutcome::Aborted) => None,
            Err(err) => {
                worker.release(id);
                return Err(err);
            }
        };
        let Some(member) = popped else {
            worker.release(id);
            break;
        };
        match member.parse::<ChunkId>() {
            Ok(chunk) => {
                core.chunk_started();
                tokio::spawn(run_chunk(Arc::clone(core), Arc::clone(worker), chunk, deadline));
            }
            // left in active; the next pass drops it once its lease expires
            Err(err) => {
                worker.release(id);
                return Err(corrupt(&active, err.to_string()));
            }
        }
    }
    Ok(())
}

async fn run_chunk(core: Arc<Core>, worker: Arc<Worker>, id: ChunkId, deadline: i64) {
    let task_id = id.task().clone();
    let in_time = match read_json(&core, &core.keys.chunk(&id), chunk_field::DATA).await {
        Ok(Some(data)) => {
            let lease = Arc::new(Lease::new(deadline));
            let chunk = Chunk::new(
                Arc::clone(&core),
                Arc::clone(&worker),
                id.clone(),
                Arc::clone(&lease),
            );
            let work = tokio::spawn({
                let core = Arc::clone(&core);
                let worker = Arc::clone(&worker);
                async move {
                    let result = match chunk.process(data.clone()).await {
                        Ok(output) => {
                            finish_chunk(&core, chunk.id(), chunk.deadline(), output).await
                        }
                        Err(source) => {
                            core.report_worker(QueueError {
                                stage: Stage::Aggregating,
                                worker: worker.name().to_string(),
                                task_id: chunk.task_id().clone(),
                                chunk_id: Some(chunk.id().clone()),
                                payload: data,
                                source,
                            });
                            settle_failed_chunk(
                                &core,
                                &worker,
                                chunk.task_id(),
                                &chunk.id().to_string(),
                                chunk.deadline(),
                                Requeue::Errored,
                            )
                            .await
                        }
                    };
                    if let Err(err) = result {
                        core.report_store(err);
                    }
                }
            });
            supervise(&core, &lease, work).await
        }
        Ok(None) => {
            debug!(worker = %worker.name(), chunk = %id, "chunk record vanished");
            true
        }
        Err(err) => {
            core.report_store(err);
            true
        }
    };
    if !in_time {
        warn!(worker = %worker.name(), chunk = %id, "chunk outlived its lease; slot released");
    }

    worker.release(&task_id);
    aggregate(Arc::clone(&core), Arc::clone(&worker), task_id).await;
    core.chunk_finished();
}

async fn finish_chunk(
    core: &Core,
    id: &ChunkId,
    deadline: i64,
    output: Value,
) -> Result<(), StoreError> {
    let active = core.keys.chunks(id.task(), ChunkState::Active);
    let member = id.to_string();
    let txn = Transaction::new()
        .when(Guard::ScoreEquals {
            key: active.clone(),
            member: member.clone(),
            score: Some(deadline),
        })
        .then(Op::ZRemove {
            key: active,
            member: member.clone(),
        })
        .then(Op::SetAdd {
            key: core.keys.chunks(id.task(), ChunkState::Done),
            member,
        })
        .then(Op::HashSet {
            key: core.keys.chunk(id),
            fields: vec![(chunk_field::RESULT.to_string(), output.to_string())],
        });
    if core.store.transact(txn).await?.is_committed() {
        debug!(chunk = %id, "chunk done");
    } else {
        debug!(chunk = %id, "chunk result discarded; lease lost");
    }
    Ok(())
}

/// Where a failed chunk goes while it still has retries left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requeue {
    /// Lease expired: straight back to pending.
    Pending,
    /// `process` failed: errored until `now + retry_delay`.
    Errored,
}

/// Counts one failure of an active chunk held under `score`. Past the
/// retry budget the chunk is deleted and `reduce` will not see it.
async fn settle_failed_chunk(
    core: &Core,
    worker: &Worker,
    task: &TaskId,
    member: &str,
    score: i64,
    requeue: Requeue,
) -> Result<(), StoreError> {
    let active = core.keys.chunks(task, ChunkState::Active);
    let guard = Guard::ScoreEquals {
        key: active.clone(),
        member: member.to_string(),
        score: Some(score),
    };
    let leave_active = Op::ZRemove {
        key: active.clone(),
        member: member.to_string(),
    };

    let Ok(chunk) = member.parse::<ChunkId>() else {
        warn!(worker = %worker.name(), task = %task, member, "dropping malformed chunk id");
        core.store
            .transact(Transaction::new().when(guard).then(leave_active))
            .await?;
        return Ok(());
    };

    let chunk_key = core.keys.chunk(&chunk);
    let retries = parse_opt::<u32>(
        &chunk_key,
        core.store.hget(&chunk_key, chunk_field::RETRIES).await?.as_ref(),
    )?
    .unwrap_or(0)
    .saturating_add(1);

    if worker.policy().exhausted(retries) {
        let txn = Transaction::new()
            .when(guard)
            .then(leave_active)
            .then(Op::Delete(chunk_key));
        if core.store.transact(txn).await?.is_committed() {
            warn!(
                worker = %worker.name(),
                chunk = %chunk,
                retries,
                "chunk exceeded its retries; dropped"
            );
        }
        return Ok(());
    }

    let destination = match requeue {
        Requeue::Pending => Op::ListPush {
            key: core.keys.chunks(task, ChunkState::Pending),
            member: member.to_string(),
        },
        Requeue::Errored => Op::ZAdd {
            key: core.keys.chunks(task, ChunkState::Errored),
            member: member.to_string(),
            score: core.store.now().await?.saturating_add(worker.policy().delay_ms()),
        },
    };
    let txn = Transaction::new()
        .when(guard)
        .then(leave_active)
        .then(destination)
        .then(Op::HashSet {
            key: chunk_key,
            fields: vec![(chunk_field::RETRIES.to_string(), retries.to_string())],
        });
    if core.store.transact(txn).await?.is_committed() {
        debug!(worker = %worker.name(), chunk = %chunk, retries, ?requeue, "chunk requeued");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// reduce

async fn begin_reduce(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
    id: &TaskId,
) -> Result<(), StoreError> {
    let member = id.to_string();
    let aggregating = core.keys.state(worker.name(), TaskState::Aggregating);
    let deadline = core.store.now().await?.saturating_add(worker.policy().lease_ms());

    let txn = Transaction::new()
        .when(Guard::SetContains {
            key: aggregating.clone(),
            member: member.clone(),
        })
        .when(Guard::Empty(core.keys.chunks(id, ChunkState::Pending)))
        .when(Guard::Empty(core.keys.chunks(id, ChunkState::Active)))
        .when(Guard::Empty(core.keys.chunks(id, ChunkState::Errored)))
        .then(Op::SetRemove {
            key: aggregating,
            member: member.clone(),
        })
        .then(Op::ZAdd {
            key: core.keys.state(worker.name(), TaskState::Reducing),
            member,
            score: deadline,
        })
        .then(Op::HashSet {
            key: core.keys.task(id),
            fields: vec![
                (task_field::STATE.to_string(), TaskState::Reducing.to_string()),
                (task_field::RETRIES.to_string(), "0".to_string()),
                (task_field::DEADLINE.to_string(), deadline.to_string()),
            ],
        });

    if core.store.transact(txn).await?.is_committed() {
        debug!(worker = %worker.name(), task = %id, "all chunks settled; reducing");
        tokio::spawn(run_reduce(Arc::clone(core), Arc::clone(worker), id.clone(), deadline));
    }
    Ok(())
}

/// Results of the chunks in `done`, in chunk order.
async fn collect_results(core: &Core, id: &TaskId) -> Result<Vec<Value>, StoreError> {
    let done_key = core.keys.chunks(id, ChunkState::Done);
    let mut done = core
        .store
        .smembers(&done_key)
        .await?
        .into_iter()
        .map(|member| member.parse::<ChunkId>().map_err(|e| corrupt(&done_key, e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    done.sort_by_key(ChunkId::index);

    let mut results = Vec::with_capacity(done.len());
    for chunk in &done {
        if let Some(result) = read_json(core, &core.keys.chunk(chunk), chunk_field::RESULT).await? {
            results.push(result);
        }
    }
    Ok(results)
}

pub(crate) async fn run_reduce(core: Arc<Core>, worker: Arc<Worker>, id: TaskId, deadline: i64) {
    let results = match collect_results(&core, &id).await {
        Ok(results) => results,
        Err(err) => {
            core.report_store(err);
            return;
        }
    };

    let lease = Arc::new(Lease::new(deadline));
    let task = Task::new(
        Arc::clone(&core),
        Arc::clone(&worker),
        id.clone(),
        TaskState::Reducing,
        Arc::clone(&lease),
    );
    let work = tokio::spawn({
        let core = Arc::clone(&core);
        let worker = Arc::clone(&worker);
        async move {
            let result = match task.reduce(results.clone()).await {
                Ok(()) => finish_task(&core, &worker, task.id(), task.deadline()).await,
                Err(source) => {
                    core.report_worker(QueueError {
                        stage: Stage::Reducing,
                        worker: worker.name().to_string(),
                        task_id: task.id().clone(),
                        chunk_id: None,
                        payload: Value::Array(results),
                        source,
                    });
                    rearm(&core, &worker, task.id(), TaskState::Reducing, task.deadline()).await
                }
            };
            if let Err(err) = result {
                core.report_store(err);
            }
        }
    });

    if !supervise(&core, &lease, work).await {
        warn!(worker = %worker.name(), task = %id, "reduce outlived its lease");
    }
}

/// Number of chunk records a task owns.
pub(crate) async fn chunk_count(core: &Core, id: &TaskId) -> Result<usize, StoreError> {
    let key = core.keys.task(id);
    Ok(parse_opt(&key, core.store.hget(&key, task_field::CHUNKS).await?.as_ref())?.unwrap_or(0))
}

async fn finish_task(
    core: &Core,
    worker: &Worker,
    id: &TaskId,
    deadline: i64,
) -> Result<(), StoreError> {
    let chunks = chunk_count(core, id).await?;
    let txn = Transaction::new()
        .when(Guard::ScoreEquals {
            key: core.keys.state(worker.name(), TaskState::Reducing),
            member: id.to_string(),
            score: Some(deadline),
        })
        .then_all(purge_ops(core, worker.name(), id, chunks));
    if core.store.transact(txn).await?.is_committed() {
        info!(worker = %worker.name(), task = %id, chunks, "task completed");
    } else {
        debug!(worker = %worker.name(), task = %id, "reduce result discarded; lease lost");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HandlerError;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use crate::queue::{Queue, QueueConfig};
    use crate::typed::JobHandler;
    use crate::app::worker_loop::promote_postponed;
    use crate::worker::WorkerOptions;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    struct Keyed;

    #[async_trait]
    impl JobHandler for Keyed {
        async fn process(&self, _chunk: &Chunk, data: Value) -> Result<Value, HandlerError> {
            Ok(data)
        }

        fn task_id(&self, data: &Value) -> Option<TaskId> {
            data.get("key").and_then(Value::as_str).map(TaskId::from)
        }
    }

    fn setup() -> (Queue, Arc<InMemoryStore>, Arc<Worker>) {
        let store = Arc::new(InMemoryStore::with_clock(FixedClock::new(1_000)));
        let queue = Queue::from_parts(store.clone(), QueueConfig::default());
        let worker = queue
            .register_worker(WorkerOptions::new("w"), Keyed)
            .unwrap()
            .worker()
            .clone();
        (queue, store, worker)
    }

    #[tokio::test]
    async fn enqueue_is_deduplicated_by_task_id() {
        let (queue, _store, worker) = setup();
        let core = queue.core();

        let first = enqueue(core, &worker, json!({"key": "k", "n": 1}), None).await.unwrap();
        let second = enqueue(core, &worker, json!({"key": "k", "n": 2}), None).await.unwrap();
        assert_eq!(first, second);

        let pending = core.keys.state("w", TaskState::Pending);
        assert_eq!(core.store.scard(&pending).await.unwrap(), 1);
        let data = read_json(core, &core.keys.task(&first), task_field::DATA).await.unwrap();
        assert_eq!(data, Some(json!({"key": "k", "n": 1})));
    }

    #[tokio::test]
    async fn postponed_task_is_scored_by_due_time() {
        let (queue, _store, worker) = setup();
        let core = queue.core();

        let id = enqueue(core, &worker, json!({"key": "later"}), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let postponed = core.keys.state("w", TaskState::Postponed);
        assert_eq!(core.store.zscore(&postponed, id.as_str()).await.unwrap(), Some(6_000));
    }

    #[rstest]
    #[case::max(Duration::MAX)]
    #[case::largest_exact(Duration::from_millis(i64::MAX as u64))]
    #[tokio::test]
    async fn far_future_postponement_saturates(#[case] delay: Duration) {
        let (queue, _store, worker) = setup();
        let core = queue.core();

        let id = enqueue(core, &worker, json!({"key": "never"}), Some(delay))
            .await
            .unwrap();

        let postponed = core.keys.state("w", TaskState::Postponed);
        assert_eq!(core.store.zscore(&postponed, id.as_str()).await.unwrap(), Some(i64::MAX));
        assert_eq!(promote_postponed(core, &worker).await.unwrap(), 0);
        assert_eq!(core.store.scard(&core.keys.state("w", TaskState::Pending)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn extending_by_max_duration_saturates() {
        let (queue, _store, worker) = setup();
        let core = queue.core();
        let id = TaskId::new("long");
        let mapping = core.keys.state("w", TaskState::Mapping);
        core.store
            .transact(Transaction::new().then(Op::ZAdd {
                key: mapping.clone(),
                member: id.to_string(),
                score: 31_000,
            }))
            .await
            .unwrap();

        let lease = Arc::new(Lease::new(31_000));
        let task = Task::new(
            Arc::clone(core),
            Arc::clone(&worker),
            id.clone(),
            TaskState::Mapping,
            Arc::clone(&lease),
        );
        assert!(task.extend(Duration::MAX).await.unwrap());
        assert_eq!(lease.deadline(), i64::MAX);
        assert_eq!(core.store.zscore(&mapping, id.as_str()).await.unwrap(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let (queue, store, worker) = setup();
        let core = queue.core();
        let id = TaskId::new("t");

        let record = TaskRecord::new("w", json!(null), TaskState::Aggregating, 0);
        let chunk = id.chunk(0);
        let setup = Transaction::new()
            .then(Op::HashSet {
                key: core.keys.task(&id),
                fields: record.to_fields(),
            })
            .then(Op::SetAdd {
                key: core.keys.state("w", TaskState::Aggregating),
                member: id.to_string(),
            })
            .then(Op::HashSet {
                key: core.keys.chunk(&chunk),
                fields: vec![("data".into(), "1".into())],
            })
            .then(Op::SetAdd {
                key: core.keys.chunks(&id, ChunkState::Done),
                member: chunk.to_string(),
            });
        core.store.transact(setup).await.unwrap();

        let purge = Transaction::new().then_all(purge_ops(core, worker.name(), &id, 1));
        core.store.transact(purge).await.unwrap();

        assert!(store.keys().is_empty());
    }
}
