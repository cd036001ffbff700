use thiserror::Error;

/// Why `register_worker` refused a worker.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("worker name must not be empty")]
    EmptyName,

    #[error("duplicate worker name={0}")]
    DuplicateWorker(String),

    #[error("invalid cron expression {expr:?} for worker={worker}: {reason}")]
    InvalidCron {
        worker: String,
        expr: String,
        reason: String,
    },
}

/// A `QueueConfig` field out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("prefix must not be empty")]
    EmptyPrefix,

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
}

/// Why `QueueBuilder::build` failed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid queue config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}
