//! Liveness GC for abandoned workers.
//!
//! Every tick each process stamps its registered worker names into
//! `{p}:workers`. A name nobody has stamped for `worker_ttl` belongs to a
//! worker that was renamed or retired; all of its tasks are deleted. The
//! scan runs `gc_grace` after start and then every `gc_interval`.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::app::status;
use crate::domain::{TaskId, TaskState};
use crate::ports::{Guard, Op, StoreError, Transaction};
use crate::queue::{Core, duration_ms};

#[derive(Debug, Default)]
pub(crate) struct GcSchedule {
    state: Mutex<GcState>,
}

#[derive(Debug, Default)]
struct GcState {
    started: Option<Instant>,
    last_run: Option<Instant>,
}

impl GcSchedule {
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = GcState {
            started: Some(Instant::now()),
            last_run: None,
        };
    }

    /// Whether a scan should run now; records the run if so.
    pub(crate) fn due(&self, grace: Duration, interval: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let started = *state.started.get_or_insert(now);
        if now.duration_since(started) < grace {
            return false;
        }
        if let Some(last_run) = state.last_run
            && now.duration_since(last_run) < interval
        {
            return false;
        }
        state.last_run = Some(now);
        true
    }
}

pub(crate) async fn collect_if_due(core: &Core) -> Result<usize, StoreError> {
    if !core.gc.due(core.config.gc_grace(), core.config.gc_interval()) {
        return Ok(0);
    }
    collect(core).await
}

/// Deletes every task of every worker not seen for `worker_ttl`, except
/// workers registered on this process. Returns the number of tasks deleted.
pub(crate) async fn collect(core: &Core) -> Result<usize, StoreError> {
    let workers = core.keys.workers();
    let cutoff = core
        .store
        .now()
        .await?
        .saturating_sub(duration_ms(core.config.worker_ttl()));
    let stale = core
        .store
        .zrange_by_score(&workers, i64::MIN, cutoff, None)
        .await?;
    debug!(stale = stale.len(), "liveness gc scan");

    let mut deleted = 0;
    for (name, last_seen) in stale {
        if core.registry.contains(&name) {
            continue;
        }

        let mut tasks = 0;
        for state in TaskState::ALL {
            let key = core.keys.state(&name, state);
            let members = if state.is_scored() {
                core.store
                    .zrange_by_score(&key, i64::MIN, i64::MAX, None)
                    .await?
                    .into_iter()
                    .map(|(member, _)| member)
                    .collect()
            } else {
                core.store.smembers(&key).await?
            };
            for member in members {
                status::delete_task(core, &name, &TaskId::from(member)).await?;
                tasks += 1;
            }
        }

        let txn = Transaction::new()
            .when(Guard::ScoreEquals {
                key: workers.clone(),
                member: name.clone(),
                score: Some(last_seen),
            })
            .then(Op::ZRemove {
                key: workers.clone(),
                member: name.clone(),
            });
        core.store.transact(txn).await?;
        info!(worker = %name, tasks, "collected abandoned worker");
        deleted += tasks;
    }
    Ok(deleted)
}
