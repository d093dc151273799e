// Cache Configuration
//
// Tuning knobs for the stream consumer, loadable from JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a freshly started consumer begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Replay the whole log, rebuilding the projection from scratch.
    #[default]
    Beginning,

    /// Skip everything already in the log; only new entries are applied.
    Latest,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("backoff_initial_ms must be at least 1")]
    ZeroBackoff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long one poll may block waiting for new entries.
    pub block_timeout_ms: u64,

    /// Maximum entries fetched per poll.
    pub batch_size: usize,

    /// First retry delay after a log I/O failure. Doubles per failure.
    pub backoff_initial_ms: u64,

    /// Upper bound on the retry delay.
    pub backoff_max_ms: u64,

    pub start_from: StartFrom,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_timeout_ms: 1_000,
            batch_size: 100,
            backoff_initial_ms: 100,
            backoff_max_ms: 5_000,
            start_from: StartFrom::Beginning,
        }
    }
}

impl CacheConfig {
    /// Reject settings under which the consumer could never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.backoff_initial_ms == 0 {
            return Err(ConfigError::ZeroBackoff);
        }
        Ok(())
    }

    /// Entries fetched per poll, never zero.
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms))
    }
}
