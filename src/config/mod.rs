//! # Batch Orchestration Configuration
//!
//! Layered configuration for the orchestration core. Values come from
//! `base.toml`, an environment overlay (`{environment}.toml`) and finally
//! `TASKER_BATCH__`-prefixed environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_batch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let step_timeout = manager.config().execution.default_step_timeout();
//! let retry_capacity = manager.config().retry_queue.max_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/base.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskerBatchConfig {
    /// Step and chunk execution settings
    pub execution: ExecutionConfig,

    /// Backoff applied between retry attempts
    pub backoff: BackoffConfig,

    /// Bounded retry queue
    pub retry_queue: RetryQueueConfig,

    /// Retention of terminal contexts and batch records
    pub retention: RetentionConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

impl TaskerBatchConfig {
    /// Validate all sections, returning the first problem found
    pub fn validate(&self) -> ConfigResult<()> {
        self.execution.validate()?;
        self.backoff.validate()?;
        self.retry_queue.validate()?;
        self.retention.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Dispatch timeout for steps that do not declare their own
    pub default_step_timeout_ms: u64,
    /// Number of chunks allowed in flight at once
    pub max_in_flight_chunks: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: 30_000,
            max_in_flight_chunks: 1,
        }
    }
}

impl ExecutionConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.default_step_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.default_step_timeout_ms",
                "0",
                "must be greater than zero",
            ));
        }
        if self.max_in_flight_chunks == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.max_in_flight_chunks",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap applied after exponential growth
    pub max_delay_ms: u64,
    /// Exponential multiplier (default: 2.0)
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter_enabled: bool,
    /// Maximum jitter fraction (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                self.multiplier.to_string(),
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_jitter) {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_jitter",
                self.max_jitter.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_ms",
                self.max_delay_ms.to_string(),
                "must not be smaller than backoff.base_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryQueueConfig {
    /// Maximum number of retries waiting on backoff across all running batches
    pub max_size: usize,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self { max_size: 1_000 }
    }
}

impl RetryQueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry_queue.max_size",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// TTL for completed contexts and batches
    pub completed_ttl_seconds: u64,
    /// TTL for failed contexts and batches, kept longer for diagnosis
    pub failed_ttl_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_ttl_seconds: 3_600,
            failed_ttl_seconds: 7 * 24 * 3_600,
        }
    }
}

impl RetentionConfig {
    pub fn completed_ttl(&self) -> Duration {
        Duration::from_secs(self.completed_ttl_seconds)
    }

    pub fn failed_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_ttl_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.completed_ttl_seconds == 0 || self.failed_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "retention",
                format!(
                    "completed={}, failed={}",
                    self.completed_ttl_seconds, self.failed_ttl_seconds
                ),
                "TTLs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.level.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "logging.level",
                "logging",
            ));
        }
        Ok(())
    }
}
