//! Scheduler configuration, loaded from TOML with per-field defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Workers started by `Scheduler::start`.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay before re-notifying workers when nothing is runnable.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Growth factor for consecutive idle retries. 1.0 keeps the delay fixed.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    /// Upper bound for the retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Timeout applied to tasks submitted without one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_workers() -> usize { 2 }
fn default_retry_delay_ms() -> u64 { 10_000 }
fn default_retry_backoff() -> f64 { 1.0 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_timeout_secs() -> u64 { 600 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff: default_retry_backoff(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::Invalid("retry_delay_ms must be positive".into()));
        }
        if self.retry_backoff.is_nan() || self.retry_backoff < 1.0 {
            return Err(ConfigError::Invalid("retry_backoff must be >= 1.0".into()));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ConfigError::Invalid(
                "max_retry_delay_ms must be >= retry_delay_ms".into(),
            ));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid("default_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}
