//! Watchdog for expired mapping/reducing leases.
//!
//! A task sits in `mapping`/`reducing` scored by its lease deadline. Once the
//! deadline passes, whichever process sweeps first takes the task over under
//! a fresh lease and re-runs the callback; the guard on the old deadline
//! makes the takeover exclusive. Past the retry budget the task is deleted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::lifecycle;
use crate::domain::{TaskId, TaskState};
use crate::ports::{Guard, Op, StoreError, Transaction};
use crate::queue::Core;
use crate::queue::record::{parse_opt, task_field};
use crate::worker::Worker;

/// Sweeps up to `claims_per_tick` expired tasks of `state` and returns how
/// many were restarted by this process.
pub(crate) async fn sweep(
    core: &Arc<Core>,
    worker: &Arc<Worker>,
    state: TaskState,
) -> Result<usize, StoreError> {
    debug_assert!(matches!(state, TaskState::Mapping | TaskState::Reducing));
    let key = core.keys.state(worker.name(), state);
    let now = core.store.now().await?;
    let expired = core
        .store
        .zrange_by_score(&key, i64::MIN, now, Some(core.config.claims_per_tick))
        .await?;

    let mut restarted = 0;
    for (member, deadline) in expired {
        let id = TaskId::from(member.clone());
        let task_key = core.keys.task(&id);
        let mut fields = core
            .store
            .hmget(&task_key, &[task_field::RETRIES, task_field::CHUNKS])
            .await?
            .into_iter();
        let retries = parse_opt::<u32>(&task_key, fields.next().flatten().as_ref())?
            .unwrap_or(0)
            .saturating_add(1);
        let guard = Guard::ScoreEquals {
            key: key.clone(),
            member: member.clone(),
            score: Some(deadline),
        };

        if worker.policy().exhausted(retries) {
            let chunks = parse_opt(&task_key, fields.next().flatten().as_ref())?.unwrap_or(0);
            let txn = Transaction::new()
                .when(guard)
                .then_all(lifecycle::purge_ops(core, worker.name(), &id, chunks));
            if core.store.transact(txn).await?.is_committed() {
                warn!(
                    worker = %worker.name(),
                    task = %id,
                    %state,
                    retries,
                    "task exceeded its retries; dropped"
                );
            }
            continue;
        }

        let next = now.saturating_add(worker.policy().lease_ms());
        let txn = Transaction::new()
            .when(guard)
            .then(Op::ZAdd {
                key: key.clone(),
                member,
                score: next,
            })
            .then(Op::HashSet {
                key: task_key,
                fields: vec![
                    (task_field::RETRIES.to_string(), retries.to_string()),
                    (task_field::DEADLINE.to_string(), next.to_string()),
                ],
            });
        if !core.store.transact(txn).await?.is_committed() {
            continue;
        }

        debug!(worker = %worker.name(), task = %id, %state, retries, "lease expired; restarting");
        restarted += 1;
        let (core, worker) = (Arc::clone(core), Arc::clone(worker));
        if state == TaskState::Mapping {
            tokio::spawn(lifecycle::run_map(core, worker, id, next));
        } else {
            tokio::spawn(lifecycle::run_reduce(core, worker, id, next));
        }
    }
    Ok(restarted)
}
