//! Logging setup and queue gauges.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job. `init_logging` is the one-liner for binaries and tests that
//! do not need anything fancier.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::TaskState;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    #[default]
    Pretty,
}

/// Installs a global subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call has an effect, and an
/// already installed subscriber is left alone.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Number of tasks of one worker per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub postponed: usize,
    pub pending: usize,
    pub mapping: usize,
    pub aggregating: usize,
    pub reducing: usize,
}

impl QueueCounts {
    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Postponed => self.postponed,
            TaskState::Pending => self.pending,
            TaskState::Mapping => self.mapping,
            TaskState::Aggregating => self.aggregating,
            TaskState::Reducing => self.reducing,
        }
    }

    pub(crate) fn set(&mut self, state: TaskState, n: usize) {
        match state {
            TaskState::Postponed => self.postponed = n,
            TaskState::Pending => self.pending = n,
            TaskState::Mapping => self.mapping = n,
            TaskState::Aggregating => self.aggregating = n,
            TaskState::Reducing => self.reducing = n,
        }
    }

    pub fn total(&self) -> usize {
        TaskState::ALL.into_iter().map(|s| self.get(s)).sum()
    }
}
