//! Worker descriptors and the caller-facing worker handle.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cron::Schedule;
use serde_json::Value;

use crate::app::{lifecycle, status};
use crate::domain::{TaskId, TaskStatus};
use crate::error::RegistrationError;
use crate::observability::QueueCounts;
use crate::ports::StoreError;
use crate::queue::{Core, RetryPolicy};
use crate::typed::JobHandler;

/// Registration options of a worker.
///
/// ```ignore
/// let options = WorkerOptions::new("thumbnails")
///     .retry(5)
///     .timeout(Duration::from_secs(120))
///     .chunks_per_instance(4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub name: String,
    pub policy: RetryPolicy,
    /// Cap on chunks of one task processed at once by this process.
    pub chunks_per_instance: Option<usize>,
    pub cron: Option<String>,
    /// Deduplicate cron pushes across the cluster.
    pub track: bool,
}

impl WorkerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RetryPolicy::default(),
            chunks_per_instance: None,
            cron: None,
            track: false,
        }
    }

    pub fn retry(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.policy.retry_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn chunks_per_instance(mut self, cap: usize) -> Self {
        self.chunks_per_instance = Some(cap);
        self
    }

    pub fn cron(mut self, expr: impl Into<String>) -> Self {
        self.cron = Some(expr.into());
        self
    }

    pub fn track(mut self, track: bool) -> Self {
        self.track = track;
        self
    }
}

/// Accepts 5-field (minute-first) expressions by prepending a seconds field.
fn parse_cron(worker: &str, expr: &str) -> Result<Schedule, RegistrationError> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| RegistrationError::InvalidCron {
        worker: worker.to_string(),
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Process-local worker descriptor.
///
/// Only `tracker` changes after registration: it counts, per task, the
/// chunks this process is running right now.
pub struct Worker {
    options: WorkerOptions,
    handler: Arc<dyn JobHandler>,
    schedule: Option<Schedule>,
    tracker: Mutex<HashMap<TaskId, usize>>,
    cron_armed: AtomicBool,
}

impl Worker {
    pub(crate) fn new(
        options: WorkerOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, RegistrationError> {
        if options.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        let schedule = options
            .cron
            .as_deref()
            .map(|expr| parse_cron(&options.name, expr))
            .transpose()?;
        Ok(Self {
            options,
            handler,
            schedule,
            tracker: Mutex::new(HashMap::new()),
            cron_armed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.options.policy
    }

    pub(crate) fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    pub(crate) fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Takes one local processing slot for a chunk of `task`. Returns false
    /// when the task is already at `chunks_per_instance`.
    pub(crate) fn try_reserve(&self, task: &TaskId) -> bool {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let count = tracker.entry(task.clone()).or_insert(0);
        if self.options.chunks_per_instance.is_some_and(|cap| *count >= cap) {
            if *count == 0 {
                tracker.remove(task);
            }
            return false;
        }
        *count += 1;
        true
    }

    pub(crate) fn release(&self, task: &TaskId) {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = tracker.get_mut(task) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                tracker.remove(task);
            }
        }
    }

    /// Chunks of `task` running on this process.
    pub fn in_flight(&self, task: &TaskId) -> usize {
        let tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        tracker.get(task).copied().unwrap_or(0)
    }

    /// Marks the cron timer as armed; false if it already was.
    pub(crate) fn arm_cron(&self) -> bool {
        !self.cron_armed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn disarm_cron(&self) {
        self.cron_armed.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Handle returned by `Queue::register_worker`.
#[derive(Clone)]
pub struct WorkerRef {
    core: Arc<Core>,
    worker: Arc<Worker>,
}

impl WorkerRef {
    pub(crate) fn new(core: Arc<Core>, worker: Arc<Worker>) -> Self {
        Self { core, worker }
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Enqueues a task and returns its id. If a task with the same id already
    /// exists nothing changes and the existing id is returned.
    pub async fn push(&self, data: Value) -> Result<TaskId, StoreError> {
        lifecycle::enqueue(&self.core, &self.worker, data, None).await
    }

    /// Like `push`, but the task only becomes claimable after `delay`.
    pub async fn postpone(&self, data: Value, delay: Duration) -> Result<TaskId, StoreError> {
        lifecycle::enqueue(&self.core, &self.worker, data, Some(delay)).await
    }

    /// Snapshot of a task, `None` once it finished or was cancelled.
    pub async fn status(&self, id: &TaskId) -> Result<Option<TaskStatus>, StoreError> {
        status::task_status(&self.core, id).await
    }

    /// Deletes a task with all its chunks. Cancelling a missing task is fine.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), StoreError> {
        status::cancel(&self.core, self.worker.name(), id).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, StoreError> {
        status::counts(&self.core, self.worker.name()).await
    }
}

impl std::fmt::Debug for WorkerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WorkerRef").field(&self.worker.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handle::Chunk;
    use crate::domain::HandlerError;
    use async_trait::async_trait;
    use rstest::rstest;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn process(&self, _chunk: &Chunk, data: Value) -> Result<Value, HandlerError> {
            Ok(data)
        }
    }

    fn worker(options: WorkerOptions) -> Result<Worker, RegistrationError> {
        Worker::new(options, Arc::new(Echo))
    }

    #[test]
    fn defaults() {
        let options = WorkerOptions::new("w");
        assert_eq!(options.policy, RetryPolicy::default());
        assert_eq!(options.chunks_per_instance, None);
        assert!(!options.track);
    }

    #[rstest]
    #[case::six_fields("*/5 * * * * *")]
    #[case::five_fields("*/5 * * * *")]
    #[case::with_year("0 0 12 * * * 2030")]
    fn cron_accepted(#[case] expr: &str) {
        let worker = worker(WorkerOptions::new("w").cron(expr)).unwrap();
        assert!(worker.schedule().is_some());
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = worker(WorkerOptions::new("w").cron("every tuesday")).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InvalidCron { expr, .. } if expr == "every tuesday"
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(
            worker(WorkerOptions::new("")),
            Err(RegistrationError::EmptyName)
        ));
    }

    #[test]
    fn slots_are_capped_per_task() {
        let worker = worker(WorkerOptions::new("w").chunks_per_instance(2)).unwrap();
        let a = TaskId::new("a");
        let b = TaskId::new("b");

        assert!(worker.try_reserve(&a));
        assert!(worker.try_reserve(&a));
        assert!(!worker.try_reserve(&a));
        assert!(worker.try_reserve(&b));
        assert_eq!(worker.in_flight(&a), 2);

        worker.release(&a);
        assert!(worker.try_reserve(&a));

        worker.release(&a);
        worker.release(&a);
        worker.release(&b);
        assert_eq!(worker.in_flight(&a), 0);
        assert!(worker.tracker.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_cap_never_reserves() {
        let worker = worker(WorkerOptions::new("w").chunks_per_instance(0)).unwrap();
        assert!(!worker.try_reserve(&TaskId::new("a")));
        assert!(worker.tracker.lock().unwrap().is_empty());
    }

    #[test]
    fn unbounded_without_cap() {
        let worker = worker(WorkerOptions::new("w")).unwrap();
        let a = TaskId::new("a");
        for _ in 0..100 {
            assert!(worker.try_reserve(&a));
        }
    }

    #[test]
    fn cron_arming_is_one_shot() {
        let worker = worker(WorkerOptions::new("w")).unwrap();
        assert!(worker.arm_cron());
        assert!(!worker.arm_cron());
        worker.disarm_cron();
        assert!(worker.arm_cron());
    }
}
