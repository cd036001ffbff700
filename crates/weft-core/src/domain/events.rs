//! Events emitted by a queue instance.
//!
//! Subscribers get them through `Queue::subscribe` (a tokio broadcast
//! channel). Slow subscribers lag and lose events; the queue never blocks on
//! them.

use std::sync::Arc;

use thiserror::Error;

use super::errors::QueueError;
use crate::ports::StoreError;

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A worker callback failed, or a store call did.
    Error(Arc<EventError>),
    /// No chunk is in flight on this process any more.
    Idle,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Worker(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueEvent {
    pub fn error(err: impl Into<EventError>) -> Self {
        QueueEvent::Error(Arc::new(err.into()))
    }

    pub fn as_worker_error(&self) -> Option<&QueueError> {
        match self {
            QueueEvent::Error(err) => match err.as_ref() {
                EventError::Worker(e) => Some(e),
                EventError::Store(_) => None,
            },
            QueueEvent::Idle => None,
        }
    }
}
