//! The tick loop.
//!
//! Every `poll_interval` this process, for each registered worker:
//! 1. records the worker as alive
//! 2. promotes due postponed tasks to pending
//! 3. claims pending tasks into mapping and runs `map` on them
//! 4. restarts mapping tasks whose lease expired
//! 5. runs an aggregation pass over every aggregating task
//! 6. restarts reducing tasks whose lease expired
//!
//! and then runs liveness GC when due. Ticks never overlap: a tick that is
//! still running when the interval fires makes the loop skip that beat.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::app::{gc_loop, lifecycle, reaper_loop};
use crate::domain::{TaskId, TaskState};
use crate::ports::{Guard, Op, StoreError, Transaction};
use crate::queue::Core;
use crate::queue::record::task_field;
use crate::worker::Worker;

pub(crate) fn spawn(core: Arc<Core>) -> JoinHandle<()> {
    tokio::spawn(run(core))
}

async fn run(core: Arc<Core>) {
    let mut shutdown_rx = core.shutdown_signal();
    let mut interval = tokio::time::interval(core.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = interval.tick() => {}
        }

        if !core.begin_tick() {
            trace!("previous tick still running; skipping");
            continue;
        }
        let ticking = Arc::clone(&core);
        core.track(tokio::spawn(async move {
            tick(&ticking).await;
            ticking.end_tick();
        }));
    }
    debug!("tick loop stopped");
}

/// Runs one tick unless one is already running.
pub(crate) async fn tick_once(core: &Arc<Core>) {
    if core.begin_tick() {
        tick(core).await;
        core.end_tick();
    }
}

async fn tick(core: &Arc<Core>) {
    let workers = core.registry.all();
    if let Err(err) = heartbeat(core, &workers).await {
        core.report_store(err);
    }
    for worker in &workers {
        if let Err(err) = tick_worker(core, worker).await {
            core.report_store(err);
        }
    }
    if let Err(err) = gc_loop::collect_if_due(core).await {
        core.report_store(err);
    }
}

async fn tick_worker(core: &Arc<Core>, worker: &Arc<Worker>) -> Result<(), StoreError> {
    promote_postponed(core, worker).await?;
    claim_pending(core, worker).await?;
    reaper_loop::sweep(core, worker, TaskState::Mapping).await?;

    let aggregating = core.keys.state(worker.name(), TaskState::Aggregating);
    for member in core.store.smembers(&aggregating).await? {
        lifecycle::aggregate(Arc::clone(core), Arc::clone(worker), TaskId::from(member)).await;
    }

    reaper_loop::sweep(core, worker, TaskState::Reducing).await?;
    Ok(())
}

async fn heartbeat(core: &Core, workers: &[Arc<Worker>]) -> Result<(), StoreError> {
    if workers.is_empty() {
        return Ok(());
    }
    let now = core.store.now().await?;
    let key = core.keys.workers();
    let txn = Transaction::new().then_all(workers.iter().map(|worker| Op::ZAdd {
        key: key.clone(),
        member: worker.name().to_string(),
        score: now,
    }));
    core.store.transact(txn).await?;
    Ok(())
}

/// Moves due postponed tasks to pending.
pub(crate) async fn promote_postponed(core: &Core, worker: &Worker) -> Result<usize, StoreError> {
    let postponed = core.keys.state(worker.name(), TaskState::Postponed);
    let now = core.store.now().await?;
    let due = core
        .store
        .zrange_by_score(&postponed, i64::MIN, now, Some(core.config.claims_per_tick))
        .await?;

    let mut promoted = 0;
    for (member, due_at) in due {
        let id = TaskId::from(member.clone());
        let txn = Transaction::new()
            .when(Guard::ScoreEquals {
                key: postponed.clone(),
                member: member.clone(),
                score: Some(due_at),
            })
            .then(Op::ZRemove {
                key: postponed.clone(),
                member: member.clone(),
            })
            .then(Op::SetAdd {
                key: core.keys.state(worker.name(), TaskState::Pending),
                member,
            })
            .then(Op::HashSet {
                key: core.keys.task(&id),
                fields: vec![(task_field::STATE.to_string(), TaskState::Pending.to_string())],
            });
        if core.store.transact(txn).await?.is_committed() {
            debug!(worker = %worker.name(), task = %id, "postponed task is due");
            promoted += 1;
        }
    }
    Ok(promoted)
}

/// Claims up to `claims_per_tick` pending tasks into mapping and starts
/// `map` for each. At most one process wins any given task.
pub(crate) async fn claim_pending(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
) -> Result<usize, StoreError> {
    let pending = core.keys.state(worker.name(), TaskState::Pending);
    let mapping = core.keys.state(worker.name(), TaskState::Mapping);

    let mut claimed = 0;
    for _ in 0..core.config.claims_per_tick {
        let Some(member) = core.store.srandmember(&pending).await? else {
            break;
        };
        let id = TaskId::from(member.clone());
        let deadline = core.store.now().await?.saturating_add(worker.policy().lease_ms());
        let txn = Transaction::new()
            .when(Guard::SetContains {
                key: pending.clone(),
                member: member.clone(),
            })
            .then(Op::SetRemove {
                key: pending.clone(),
                member: member.clone(),
            })
            .then(Op::ZAdd {
                key: mapping.clone(),
                member,
                score: deadline,
            })
            .then(Op::HashSet {
                key: core.keys.task(&id),
                fields: vec![
                    (task_field::STATE.to_string(), TaskState::Mapping.to_string()),
                    (task_field::RETRIES.to_string(), "0".to_string()),
                    (task_field::DEADLINE.to_string(), deadline.to_string()),
                ],
            });
        if !core.store.transact(txn).await?.is_committed() {
            // lost the race for this one
            continue;
        }

        debug!(worker = %worker.name(), task = %id, deadline, "task claimed");
        claimed += 1;
        tokio::spawn(lifecycle::run_map(Arc::clone(core), Arc::clone(worker), id, deadline));
    }
    Ok(claimed)
}
