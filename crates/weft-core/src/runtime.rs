//! Running worker callbacks under a lease.
//!
//! A callback runs in its own tokio task. The caller waits for it only while
//! the lease lasts; after that the record is fair game for the watchdog on
//! any process, so waiting longer would just hold a local slot for nothing.
//! The callback is never aborted: if it finishes late, its write-back is a
//! guarded transaction that no longer matches and is discarded.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::queue::{Core, duration_ms};

/// Lease deadline shared between a `Task`/`Chunk` handle (which may extend
/// it) and the supervisor waiting on the callback.
#[derive(Debug)]
pub(crate) struct Lease {
    deadline: AtomicI64,
}

impl Lease {
    pub(crate) fn new(deadline: i64) -> Self {
        Self {
            deadline: AtomicI64::new(deadline),
        }
    }

    pub(crate) fn deadline(&self) -> i64 {
        self.deadline.load(Ordering::Acquire)
    }

    /// Moves the deadline from `current` to `next`; false if someone else
    /// moved it in between.
    pub(crate) fn advance(&self, current: i64, next: i64) -> bool {
        self.deadline
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Waits for `work` until the lease runs out. Returns whether the work
/// finished in time.
pub(crate) async fn supervise(core: &Core, lease: &Lease, mut work: JoinHandle<()>) -> bool {
    loop {
        let remaining = match core.store.now().await {
            Ok(now) => lease.deadline().saturating_sub(now),
            Err(err) => {
                core.report_store(err);
                duration_ms(core.config.poll_interval())
            }
        };
        if remaining <= 0 {
            return false;
        }

        tokio::select! {
            joined = &mut work => {
                if let Err(err) = joined
                    && err.is_panic()
                {
                    error!("worker callback panicked");
                }
                return true;
            }
            // the lease may have been extended meanwhile, so re-check
            _ = tokio::time::sleep(Duration::from_millis(remaining as u64)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::ports::TokioClock;
    use crate::queue::{Queue, QueueConfig};
    use std::sync::Arc;

    fn queue() -> Queue {
        Queue::from_parts(
            Arc::new(InMemoryStore::with_clock(TokioClock::new())),
            QueueConfig::default(),
        )
    }

    #[test]
    fn lease_advances_only_from_current() {
        let lease = Lease::new(10);
        assert!(lease.advance(10, 20));
        assert!(!lease.advance(10, 30));
        assert_eq!(lease.deadline(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn work_finishing_in_time_is_awaited() {
        let queue = queue();
        let now = queue.store().now().await.unwrap();
        let lease = Lease::new(now + 1_000);
        let work = tokio::spawn(tokio::time::sleep(Duration::from_millis(500)));

        assert!(supervise(queue.core(), &lease, work).await);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_detaches_work() {
        let queue = queue();
        let now = queue.store().now().await.unwrap();
        let lease = Lease::new(now + 1_000);
        let work = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));

        assert!(!supervise(queue.core(), &lease, work).await);
    }

    #[tokio::test(start_paused = true)]
    async fn extension_keeps_waiting() {
        let queue = queue();
        let now = queue.store().now().await.unwrap();
        let lease = Arc::new(Lease::new(now + 1_000));
        let work = tokio::spawn({
            let lease = Arc::clone(&lease);
            async move {
                tokio::time::sleep(Duration::from_millis(800)).await;
                lease.advance(now + 1_000, now + 5_000);
                tokio::time::sleep(Duration::from_millis(1_500)).await;
            }
        });

        assert!(supervise(queue.core(), &lease, work).await);
    }
}
