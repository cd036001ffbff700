//! Cron timers.
//!
//! Each process that registers a worker with a schedule runs its own timer.
//! With `track` the firing process must first claim the tick in the store;
//! the claim key carries the tick's scheduled timestamp, so processes agree
//! on it regardless of their local clock skew.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use serde_json::Value;
use tracing::{debug, info};

use crate::app::lifecycle;
use crate::domain::TaskId;
use crate::ports::{Guard, Op, StoreError, Transaction};
use crate::queue::{Core, duration_ms};
use crate::worker::Worker;

/// Starts the worker's cron timer unless it has none, is already armed,
/// or the queue is shut down.
pub(crate) fn arm(core: &Arc<Core>, worker: &Arc<Worker>) {
    let Some(schedule) = worker.schedule().cloned() else {
        return;
    };
    if core.is_shut_down() || !worker.arm_cron() {
        return;
    }
    debug!(worker = %worker.name(), "cron armed");
    core.track(tokio::spawn(run(Arc::clone(core), Arc::clone(worker), schedule)));
}

async fn run(core: Arc<Core>, worker: Arc<Worker>, schedule: Schedule) {
    let mut shutdown_rx = core.shutdown_signal();
    let mut last = Utc::now();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let from = last.max(Utc::now());
        let Some(next) = schedule.after(&from).next() else {
            debug!(worker = %worker.name(), "cron schedule exhausted");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        last = next;
        if let Err(err) = fire(&core, &worker, next.timestamp_millis()).await {
            core.report_store(err);
        }
    }
}

/// Handles one cron tick: claims it when tracked, then pushes a task with
/// `null` data. Returns the pushed task id, `None` if another process
/// claimed the tick.
pub(crate) async fn fire(
    core: &Core,
    worker: &Worker,
    tick_ms: i64,
) -> Result<Option<TaskId>, StoreError> {
    if worker.options().track {
        let now = core.store.now().await?;
        let key = core.keys.cron(worker.name(), tick_ms);
        let txn = Transaction::new()
            .when(Guard::KeyAbsent(key.clone()))
            .then(Op::StringSet {
                key,
                value: now.to_string(),
                expire_at: Some(now.saturating_add(duration_ms(core.config.cron_claim_ttl()))),
            });
        if !core.store.transact(txn).await?.is_committed() {
            debug!(worker = %worker.name(), tick = tick_ms, "cron tick claimed elsewhere");
            return Ok(None);
        }
    }

    let id = lifecycle::enqueue(core, worker, Value::Null, None).await?;
    info!(worker = %worker.name(), tick = tick_ms, task = %id, "cron fired");
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handle::Chunk;
    use crate::domain::HandlerError;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use crate::queue::{Queue, QueueConfig};
    use crate::typed::JobHandler;
    use crate::worker::WorkerOptions;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn process(&self, _chunk: &Chunk, data: Value) -> Result<Value, HandlerError> {
            Ok(data)
        }
    }

    fn cluster(options: WorkerOptions) -> (FixedClock, Vec<(Queue, Arc<Worker>)>) {
        let clock = FixedClock::new(1_000);
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let members = (0..2)
            .map(|_| {
                let queue = Queue::from_parts(store.clone(), QueueConfig::default());
                let worker = queue
                    .register_worker(options.clone(), Noop)
                    .unwrap()
                    .worker()
                    .clone();
                (queue, worker)
            })
            .collect();
        (clock, members)
    }

    #[tokio::test]
    async fn tracked_tick_is_pushed_once_across_processes() {
        let (clock, members) =
            cluster(WorkerOptions::new("nightly").cron("0 0 3 * * *").track(true));
        let tick = 1_700_000_000_000;

        let mut pushed = Vec::new();
        for (queue, worker) in &members {
            pushed.push(fire(queue.core(), worker, tick).await.unwrap());
        }
        assert!(pushed[0].is_some());
        assert!(pushed[1].is_none());

        // next tick is claimable again
        clock.advance(1_000);
        let next = fire(members[1].0.core(), &members[1].1, tick + 86_400_000)
            .await
            .unwrap();
        assert!(next.is_some());

        let counts = members[0].0.worker("nightly").unwrap().counts().await.unwrap();
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn tick_claim_expires() {
        let (clock, members) =
            cluster(WorkerOptions::new("nightly").cron("0 0 3 * * *").track(true));
        let (queue, worker) = &members[0];
        let tick = 1_700_000_000_000;

        let claim = queue.core().keys.cron("nightly", tick);

        assert!(fire(queue.core(), worker, tick).await.unwrap().is_some());
        assert_eq!(queue.core().store.get(&claim).await.unwrap().as_deref(), Some("1000"));

        clock.advance(duration_ms(QueueConfig::default().cron_claim_ttl()));
        assert_eq!(queue.core().store.get(&claim).await.unwrap(), None);
        assert!(fire(queue.core(), worker, tick).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn untracked_ticks_fire_everywhere() {
        let (_clock, members) = cluster(WorkerOptions::new("loose").cron("0 0 3 * * *"));
        for (queue, worker) in &members {
            assert!(fire(queue.core(), worker, 42).await.unwrap().is_some());
        }
        let counts = members[0].0.worker("loose").unwrap().counts().await.unwrap();
        assert_eq!(counts.pending, 2);
    }
}
