//! Auditor configuration
//!
//! Timeouts, retry budget, worker pool throttling and alert threshold.
//! Loadable from TOML; every field has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Auditor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Timeout for tasks without an explicit entry, in milliseconds
    pub default_task_timeout_ms: u64,
    /// Per-task timeouts, in milliseconds
    pub task_timeouts: HashMap<String, u64>,
    /// Retry budget per service
    pub max_retry_attempts: u32,
    /// Bulk worker pool settings
    pub pool: PoolConfig,
    /// Minimum position move that raises an alert
    pub alert_threshold: u32,
    /// Default page size for scan history
    pub history_limit: usize,
}

impl AuditConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default task timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_ms = duration_ms(timeout);
        self
    }

    /// With a timeout for one task
    #[inline]
    #[must_use]
    pub fn with_task_timeout(mut self, task: impl Into<String>, timeout: Duration) -> Self {
        self.task_timeouts.insert(task.into(), duration_ms(timeout));
        self
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }

    /// With pool settings
    #[inline]
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// With alert threshold
    #[inline]
    #[must_use]
    pub fn with_alert_threshold(mut self, threshold: u32) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, `ConfigError::InvalidValue` on
    /// out-of-range values.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` when the file cannot be read, otherwise as
    /// [`AuditConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Reject zero timeouts and an empty pool
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_task_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_task_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some((task, _)) = self.task_timeouts.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::InvalidValue {
                field: "task_timeouts",
                reason: format!("timeout for '{task}' must be greater than zero"),
            });
        }
        if self.pool.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Default task timeout
    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_task_timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: 30_000,
            task_timeouts: HashMap::new(),
            max_retry_attempts: 3,
            pool: PoolConfig::default(),
            alert_threshold: 5,
            history_limit: 50,
        }
    }
}

/// Bulk worker pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on concurrent workers
    pub max_concurrency: usize,
    /// Fixed pause between items, in milliseconds
    pub base_delay_ms: u64,
    /// Random extra pause, `0..=jitter_ms`
    pub jitter_ms: u64,
}

impl PoolConfig {
    /// Pool without inter-item pauses
    #[inline]
    #[must_use]
    pub fn unthrottled(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            base_delay_ms: 1_000,
            jitter_ms: 1_000,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
