//! The queue coordinator.
//!
//! A `Queue` is one process's view of the cluster. It owns no state that
//! other processes depend on: everything shared lives in the `SharedStore`,
//! and every state change is a guarded transaction, so any number of queues
//! (in one process or many) can run against the same store.
//!
//! # Loops
//! - tick loop (`app::worker_loop`): liveness, promotion, claims, watchdog,
//!   aggregation, GC
//! - one cron timer per worker with a schedule (`app::cron`)
//! - one supervisor per running callback (`runtime::supervise`)

mod config;
mod keys;
pub(crate) mod record;
mod retry;

pub use config::QueueConfig;
pub use keys::Keys;
pub use record::TaskRecord;
pub use retry::{RetryPolicy, duration_ms};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::builder::QueueBuilder;
use crate::app::gc_loop::GcSchedule;
use crate::app::{cron, worker_loop};
use crate::domain::{QueueError, QueueEvent};
use crate::error::RegistrationError;
use crate::ports::{SharedStore, StoreError};
use crate::typed::{JobHandler, WorkerRegistry};
use crate::worker::{Worker, WorkerOptions, WorkerRef};

/// State shared by a queue, its loops, its worker handles and the
/// `Task`/`Chunk` handles given to callbacks.
pub(crate) struct Core {
    pub(crate) store: Arc<dyn SharedStore>,
    pub(crate) keys: Keys,
    pub(crate) config: QueueConfig,
    pub(crate) registry: WorkerRegistry,
    pub(crate) gc: GcSchedule,
    events: broadcast::Sender<QueueEvent>,
    in_flight: AtomicUsize,
    ticking: AtomicBool,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    fn new(store: Arc<dyn SharedStore>, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            keys: Keys::new(config.prefix.clone()),
            config,
            registry: WorkerRegistry::new(),
            gc: GcSchedule::default(),
            events,
            in_flight: AtomicUsize::new(0),
            ticking: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
            background: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // ignore send error: nobody may be subscribed
        let _ = self.events.send(event);
    }

    pub(crate) fn report_store(&self, err: StoreError) {
        error!(error = %err, "store operation failed");
        self.emit(QueueEvent::error(err));
    }

    pub(crate) fn report_worker(&self, err: QueueError) {
        warn!(
            worker = %err.worker,
            task = %err.task_id,
            stage = %err.stage,
            error = %err.source,
            "worker callback failed"
        );
        self.emit(QueueEvent::error(err));
    }

    pub(crate) fn chunk_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn chunk_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("no chunks in flight");
            self.emit(QueueEvent::Idle);
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    /// Marks a tick as running; false if one already is.
    pub(crate) fn begin_tick(&self) -> bool {
        !self.ticking.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_tick(&self) {
        self.ticking.store(false, Ordering::Release);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }
}

/// Handle to a queue instance. Cheap to clone.
///
/// ```ignore
/// let queue = Queue::builder(store).config(config).build()?;
/// let sum = queue.register_worker(WorkerOptions::new("sum"), Typed(Sum))?;
/// queue.start();
/// sum.push(json!([1, 2, 3])).await?;
/// ```
#[derive(Clone)]
pub struct Queue {
    core: Arc<Core>,
}

impl Queue {
    pub fn builder(store: Arc<dyn SharedStore>) -> QueueBuilder {
        QueueBuilder::new(store)
    }

    pub(crate) fn from_parts(store: Arc<dyn SharedStore>, config: QueueConfig) -> Self {
        Self {
            core: Arc::new(Core::new(store, config)),
        }
    }

    /// Registers a worker. Names are unique per queue. A cron schedule is
    /// armed right away when called inside a tokio runtime, otherwise on
    /// `start`.
    pub fn register_worker(
        &self,
        options: WorkerOptions,
        handler: impl JobHandler,
    ) -> Result<WorkerRef, RegistrationError> {
        self.register_shared(options, Arc::new(handler))
    }

    pub fn register_shared(
        &self,
        options: WorkerOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkerRef, RegistrationError> {
        let worker = self.core.registry.register(Worker::new(options, handler)?)?;
        info!(worker = %worker.name(), cron = ?worker.options().cron, "worker registered");
        if tokio::runtime::Handle::try_current().is_ok() {
            cron::arm(&self.core, &worker);
        }
        Ok(WorkerRef::new(Arc::clone(&self.core), worker))
    }

    pub fn worker(&self, name: &str) -> Option<WorkerRef> {
        self.core
            .registry
            .get(name)
            .map(|worker| WorkerRef::new(Arc::clone(&self.core), worker))
    }

    /// Starts the tick loop (and any cron timer not armed yet). Must be
    /// called inside a tokio runtime. Starting twice is a no-op.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.shutdown.send_replace(false);
        self.core.gc.reset();
        self.core.track(worker_loop::spawn(Arc::clone(&self.core)));
        for worker in self.core.registry.all() {
            cron::arm(&self.core, &worker);
        }
        info!(workers = ?self.core.registry.names(), "queue started");
    }

    /// Stops the tick loop and cron timers and waits for them, including a
    /// tick that is mid-claim. Callbacks already running are not
    /// interrupted; their leases simply expire elsewhere if they never
    /// finish.
    pub async fn shutdown(&self) {
        self.core.running.store(false, Ordering::Release);
        self.core.shutdown.send_replace(true);
        // The loop may track one last tick while we wait on it.
        loop {
            let handles = {
                let mut background = self
                    .core
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *background)
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        for worker in self.core.registry.all() {
            worker.disarm_cron();
        }
        info!("queue stopped");
    }

    /// Runs one tick now, without waiting for the loop.
    pub async fn tick(&self) {
        worker_loop::tick_once(&self.core).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.core.events.subscribe()
    }

    /// True when no chunk runs on this process.
    pub fn is_idle(&self) -> bool {
        self.core.is_idle()
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.core.store
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }
}
