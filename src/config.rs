//! Runtime configuration for provisioning runs.
//!
//! Every field has a default, so a config file only needs the values it changes:
//!
//! ```json
//! { "retry": { "max_attempts": 5 }, "max_parallel": 2 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Bounded exponential backoff for transient admin errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per operation, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms))
    }
}

/// Configuration for a provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub retry: RetryPolicy,
    /// How long to wait for one range migration to finish
    pub migration_timeout_ms: u64,
    /// Pause between metadata reads while a migration is running
    pub poll_interval_ms: u64,
    /// Upper bound on collections provisioned at once with `--parallel`
    pub max_parallel: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            migration_timeout_ms: 600_000,
            poll_interval_ms: 500,
            max_parallel: 4,
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        if self.migration_timeout_ms == 0 {
            anyhow::bail!("migration_timeout_ms must be greater than 0");
        }
        if self.max_parallel == 0 {
            anyhow::bail!("max_parallel must be at least 1");
        }
        Ok(())
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_millis(self.migration_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ProvisionConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.retry.max_delay_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"retry": {"max_attempts": 5}, "max_parallel": 2}"#)
            .unwrap();
        file.flush().unwrap();

        let config = ProvisionConfig::load_from_file(file.path()).expect("valid config");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_save_and_reload() {
        let config = ProvisionConfig {
            migration_timeout_ms: 1000,
            ..Default::default()
        };
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).expect("save");
        assert_eq!(
            ProvisionConfig::load_from_file(file.path()).expect("load"),
            config
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ProvisionConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ProvisionConfig::default();
        config.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = ProvisionConfig::default();
        config.retry.base_delay_ms = 5000;
        assert!(config.validate().is_err());
    }
}
