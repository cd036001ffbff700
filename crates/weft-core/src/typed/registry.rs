//! Registry of the workers known to this process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::RegistrationError;
use crate::worker::Worker;

/// Worker name -> descriptor.
///
/// Workers can be registered while the queue is running, so the map sits
/// behind a lock. The lock is never held across an await.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Arc<Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: Worker) -> Result<Arc<Worker>, RegistrationError> {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let name = worker.name().to_string();
        if workers.contains_key(&name) {
            return Err(RegistrationError::DuplicateWorker(name));
        }
        let worker = Arc::new(worker);
        workers.insert(name, Arc::clone(&worker));
        Ok(worker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Worker>> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.contains_key(name)
    }

    /// All workers, sorted by name.
    pub fn all(&self) -> Vec<Arc<Worker>> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = workers.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn names(&self) -> Vec<String> {
        self.all().iter().map(|w| w.name().to_string()).collect()
    }
}
