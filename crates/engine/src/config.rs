//! Kernel configuration via `tessera.toml`
//!
//! Settings live in one TOML file. Missing keys take their defaults, so an
//! empty file is a valid configuration. `max_concurrent_transactions` can
//! also be changed at runtime through the transaction registry.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera_core::{KernelError, Result};

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

fn default_max_concurrent_transactions() -> usize {
    1000
}

fn default_timeout_monitor_interval_ms() -> u64 {
    2000
}

fn default_preallocate_logs() -> bool {
    true
}

fn default_preallocation_chunk_bytes() -> u64 {
    1024 * 1024
}

fn default_queue_batch_size() -> usize {
    100
}

fn default_out_of_order_capacity() -> usize {
    1024
}

/// Kernel configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// max_concurrent_transactions = 1000
/// transaction_timeout_ms = 0
/// preallocate_logs = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Most transactions open at once. `0` means unbounded.
    #[serde(default = "default_max_concurrent_transactions")]
    pub max_concurrent_transactions: usize,
    /// Default transaction timeout. `0` means no timeout.
    #[serde(default)]
    pub transaction_timeout_ms: u64,
    /// How often the timeout monitor runs.
    #[serde(default = "default_timeout_monitor_interval_ms")]
    pub timeout_monitor_interval_ms: u64,
    /// Reserve disk space for the log before each append.
    #[serde(default = "default_preallocate_logs")]
    pub preallocate_logs: bool,
    /// Granularity of log pre-allocation.
    #[serde(default = "default_preallocation_chunk_bytes")]
    pub preallocation_chunk_bytes: u64,
    /// Batches the transaction queue collects before applying.
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
    /// Slots of the out-of-order completion rings. Power of two.
    #[serde(default = "default_out_of_order_capacity")]
    pub out_of_order_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            max_concurrent_transactions: default_max_concurrent_transactions(),
            transaction_timeout_ms: 0,
            timeout_monitor_interval_ms: default_timeout_monitor_interval_ms(),
            preallocate_logs: default_preallocate_logs(),
            preallocation_chunk_bytes: default_preallocation_chunk_bytes(),
            queue_batch_size: default_queue_batch_size(),
            out_of_order_capacity: default_out_of_order_capacity(),
        }
    }
}

impl KernelConfig {
    /// Default transaction timeout, `None` when disabled.
    pub fn transaction_timeout(&self) -> Option<Duration> {
        match self.transaction_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Interval of the timeout monitor.
    pub fn timeout_monitor_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_monitor_interval_ms)
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if !self.out_of_order_capacity.is_power_of_two() {
            return Err(KernelError::InvalidConfig(format!(
                "out_of_order_capacity must be a power of two, got {}",
                self.out_of_order_capacity
            )));
        }
        if self.queue_batch_size == 0 {
            return Err(KernelError::InvalidConfig(
                "queue_batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout_monitor_interval_ms == 0 {
            return Err(KernelError::InvalidConfig(
                "timeout_monitor_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.preallocate_logs && self.preallocation_chunk_bytes == 0 {
            return Err(KernelError::InvalidConfig(
                "preallocation_chunk_bytes must be at least 1 when preallocate_logs is on"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KernelConfig = toml::from_str(content)
            .map_err(|e| KernelError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KernelError::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            KernelError::InvalidConfig(message) => {
                KernelError::InvalidConfig(format!("{} ({})", message, path.display()))
            }
            other => other,
        })
    }

    /// Default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera kernel configuration

# Most transactions open at once (0 = unbounded).
max_concurrent_transactions = 1000

# Default transaction timeout in milliseconds (0 = no timeout).
transaction_timeout_ms = 0

# How often open transactions are checked for timeouts.
timeout_monitor_interval_ms = 2000

# Reserve disk space for the log before appending.
preallocate_logs = true
preallocation_chunk_bytes = 1048576

# Batches collected by the transaction queue before applying.
queue_batch_size = 100

# Slots of the out-of-order completion rings (power of two).
out_of_order_capacity = 1024
"#
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize to TOML and write to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KernelError::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let config = KernelConfig::from_toml_str(KernelConfig::default_toml()).unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn empty_file_takes_defaults() {
        let config = KernelConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_concurrent_transactions, 1000);
        assert_eq!(config.transaction_timeout(), None);
        assert!(config.preallocate_logs);
    }

    #[test]
    fn timeout_parsed() {
        let config = KernelConfig::from_toml_str("transaction_timeout_ms = 250").unwrap();
        assert_eq!(config.transaction_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn capacity_must_be_power_of_two() {
        let err = KernelConfig::from_toml_str("out_of_order_capacity = 1000").unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(KernelConfig::from_toml_str("queue_batch_size = 0").is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(KernelConfig::from_toml_str("max_concurrent_transactions = \"lots\"").is_err());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        KernelConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(KernelConfig::from_file(&path).unwrap(), KernelConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_concurrent_transactions = 7").unwrap();
        KernelConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(
            KernelConfig::from_file(&path).unwrap().max_concurrent_transactions,
            7
        );
    }

    #[test]
    fn write_to_file_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = KernelConfig {
            transaction_timeout_ms: 5000,
            queue_batch_size: 8,
            ..KernelConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(KernelConfig::from_file(&path).unwrap(), config);
    }
}
