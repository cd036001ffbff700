//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Process-wide knobs of a `Queue`.
///
/// Every field has a default, so a partial JSON/TOML document deserializes:
/// ```ignore
/// let config: QueueConfig = serde_json::from_str(r#"{ "prefix": "jobs" }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prefix of every store key.
    pub prefix: String,

    /// Tick period of the polling loop.
    pub poll_interval_ms: u64,

    /// Upper bound on tasks claimed / promoted / reaped per worker per tick.
    pub claims_per_tick: usize,

    /// Workers not seen by any process for this long are garbage collected.
    pub worker_ttl_ms: u64,

    /// Delay after `start` before this process runs liveness GC.
    pub gc_grace_ms: u64,

    /// Period between two liveness GC scans on this process.
    pub gc_interval_ms: u64,

    /// Lifetime of a tracked cron tick claim.
    pub cron_claim_ttl_ms: u64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "weft".to_string(),
            poll_interval_ms: 500,
            claims_per_tick: 16,
            worker_ttl_ms: 3 * 24 * 60 * 60 * 1000,
            gc_grace_ms: 60_000,
            gc_interval_ms: 60 * 60 * 1000,
            cron_claim_ttl_ms: 60 * 60 * 1000,
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gc_grace(&self) -> Duration {
        Duration::from_millis(self.gc_grace_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn worker_ttl(&self) -> Duration {
        Duration::from_millis(self.worker_ttl_ms)
    }

    pub fn cron_claim_ttl(&self) -> Duration {
        Duration::from_millis(self.cron_claim_ttl_ms)
    }

    /// Reports the first invalid field, if any.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        let positive = [
            ("poll_interval_ms", self.poll_interval_ms == 0),
            ("claims_per_tick", self.claims_per_tick == 0),
            ("event_capacity", self.event_capacity == 0),
        ];
        match positive.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::NotPositive { field }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_reasonable() {
        let config = QueueConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.worker_ttl_ms, 259_200_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_document_gets_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{ "prefix": "jobs", "poll_interval_ms": 50 }"#).unwrap();
        assert_eq!(config.prefix, "jobs");
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.claims_per_tick, 16);
    }

    #[rstest]
    #[case::empty_prefix(
        QueueConfig { prefix: String::new(), ..QueueConfig::default() },
        ConfigError::EmptyPrefix
    )]
    #[case::zero_interval(
        QueueConfig { poll_interval_ms: 0, ..QueueConfig::default() },
        ConfigError::NotPositive { field: "poll_interval_ms" }
    )]
    #[case::zero_claims(
        QueueConfig { claims_per_tick: 0, ..QueueConfig::default() },
        ConfigError::NotPositive { field: "claims_per_tick" }
    )]
    #[case::zero_capacity(
        QueueConfig { event_capacity: 0, ..QueueConfig::default() },
        ConfigError::NotPositive { field: "event_capacity" }
    )]
    fn invalid_fields_are_named(#[case] config: QueueConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }
}
