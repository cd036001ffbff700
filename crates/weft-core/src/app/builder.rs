//! QueueBuilder - wiring a queue together
//!
//! Fail-fast: an invalid config, a duplicate worker name or a bad cron
//! expression is reported by `build()`, before anything runs.

use std::sync::Arc;

use crate::error::BuildError;
use crate::ports::SharedStore;
use crate::queue::{Queue, QueueConfig};
use crate::typed::JobHandler;
use crate::worker::WorkerOptions;

/// ```ignore
/// let queue = Queue::builder(store)
///     .prefix("jobs")
///     .worker(WorkerOptions::new("sum"), Typed(Sum))
///     .build()?;
/// let sum = queue.worker("sum").unwrap();
/// ```
pub struct QueueBuilder {
    store: Arc<dyn SharedStore>,
    config: QueueConfig,
    workers: Vec<(WorkerOptions, Arc<dyn JobHandler>)>,
}

impl QueueBuilder {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            config: QueueConfig::default(),
            workers: Vec::new(),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Registers a worker when the queue is built.
    pub fn worker(mut self, options: WorkerOptions, handler: impl JobHandler) -> Self {
        self.workers.push((options, Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<Queue, BuildError> {
        self.config.validate()?;
        let queue = Queue::from_parts(self.store, self.config);
        for (options, handler) in self.workers {
            queue.register_shared(options, handler)?;
        }
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handle::Chunk;
    use crate::domain::HandlerError;
    use crate::error::{ConfigError, RegistrationError};
    use crate::impls::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn process(&self, _chunk: &Chunk, _data: Value) -> Result<Value, HandlerError> {
            Ok(Value::Null)
        }
    }

    fn builder() -> QueueBuilder {
        Queue::builder(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn build_success() {
        let queue = builder()
            .prefix("jobs")
            .worker(WorkerOptions::new("a"), Noop)
            .worker(WorkerOptions::new("b"), Noop)
            .build()
            .unwrap();
        assert_eq!(queue.config().prefix, "jobs");
        assert!(queue.worker("a").is_some());
        assert!(queue.worker("b").is_some());
        assert!(!queue.is_running());
        assert!(queue.is_idle());
    }

    #[test]
    fn build_rejects_duplicate_workers() {
        let result = builder()
            .worker(WorkerOptions::new("a"), Noop)
            .worker(WorkerOptions::new("a"), Noop)
            .build();
        assert!(matches!(
            result,
            Err(BuildError::Registration(RegistrationError::DuplicateWorker(name))) if name == "a"
        ));
    }

    #[test]
    fn build_rejects_bad_cron() {
        let result = builder()
            .worker(WorkerOptions::new("a").cron("not a cron"), Noop)
            .build();
        assert!(matches!(
            result,
            Err(BuildError::Registration(RegistrationError::InvalidCron { .. }))
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = QueueConfig {
            claims_per_tick: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(
            builder().config(config).build(),
            Err(BuildError::InvalidConfig(ConfigError::NotPositive {
                field: "claims_per_tick"
            }))
        ));
    }
}
