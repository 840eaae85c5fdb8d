//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{defaults, paths};
use crate::models::parse_duration;
use crate::queue::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Root directory of the artifact storage; empty means `<data dir>/artifacts`
    #[serde(default)]
    pub storage_path: String,

    /// Host (and port) advertised in artifact URLs
    #[serde(default = "defaults::storage_address")]
    pub storage_address: String,

    /// Namespace to watch; empty watches all namespaces
    #[serde(default)]
    pub watch_namespace: String,

    /// Number of HelmCharts reconciled in parallel
    #[serde(default = "defaults::max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Deadline for a single reconciliation pass (Go duration, e.g. `5m`)
    #[serde(default = "defaults::reconcile_timeout")]
    pub reconcile_timeout: String,

    /// Backoff for failed passes
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logger configuration
    #[serde(default)]
    pub logger: LoggerConfig,

    /// File name of the alias pointing at the latest artifact
    #[serde(default = "defaults::artifact_alias")]
    pub artifact_alias: String,

    /// Field manager used for status patches
    #[serde(default = "defaults::field_manager")]
    pub field_manager: String,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "defaults::retry_base_delay")]
    pub base_delay: String,

    #[serde(default = "defaults::retry_max_delay")]
    pub max_delay: String,
}

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggerConfig {
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: String::new(),
            storage_address: defaults::storage_address(),
            watch_namespace: String::new(),
            max_concurrent_reconciles: defaults::max_concurrent_reconciles(),
            reconcile_timeout: defaults::reconcile_timeout(),
            retry: RetryConfig::default(),
            logger: LoggerConfig::default(),
            artifact_alias: defaults::artifact_alias(),
            field_manager: defaults::field_manager(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: defaults::retry_base_delay(),
            max_delay: defaults::retry_max_delay(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

impl Config {
    /// Storage root, falling back to the data directory
    pub fn storage_root(&self) -> PathBuf {
        if self.storage_path.is_empty() {
            paths::data_dir().join("artifacts")
        } else {
            PathBuf::from(&self.storage_path)
        }
    }

    /// Namespace filter for watches and listing; `None` means all namespaces
    pub fn namespace(&self) -> Option<String> {
        match self.watch_namespace.as_str() {
            "" | "all" | "-A" => None,
            ns => Some(ns.to_string()),
        }
    }

    pub fn reconcile_timeout(&self) -> Result<Duration> {
        parse_duration(&self.reconcile_timeout)
            .with_context(|| format!("Invalid reconcileTimeout '{}'", self.reconcile_timeout))
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let base_delay = parse_duration(&self.retry.base_delay)
            .with_context(|| format!("Invalid retry.baseDelay '{}'", self.retry.base_delay))?;
        let max_delay = parse_duration(&self.retry.max_delay)
            .with_context(|| format!("Invalid retry.maxDelay '{}'", self.retry.max_delay))?;
        Ok(RetryPolicy {
            base_delay,
            max_delay,
        })
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            anyhow::bail!("maxConcurrentReconciles must be at least 1");
        }
        if self.reconcile_timeout()?.is_zero() {
            anyhow::bail!("reconcileTimeout must be greater than zero");
        }
        let retry = self.retry_policy()?;
        if retry.base_delay > retry.max_delay {
            anyhow::bail!("retry.baseDelay must not exceed retry.maxDelay");
        }
        if self.artifact_alias.is_empty() || self.artifact_alias.contains('/') {
            anyhow::bail!("artifactAlias must be a plain file name");
        }
        if self.storage_address.is_empty() {
            anyhow::bail!("storageAddress must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("storageAddress"));
        assert!(yaml.contains("maxConcurrentReconciles"));
        assert!(yaml.contains("baseDelay"));
    }

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
storagePath: /data
watchNamespace: flux-system
maxConcurrentReconciles: 4
retry:
  maxDelay: 30s
logger:
  level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage_root(), PathBuf::from("/data"));
        assert_eq!(config.namespace().as_deref(), Some("flux-system"));
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(config.retry.base_delay, "5ms");
        assert_eq!(config.logger.level, "debug");

        let retry = config.retry_policy().unwrap();
        assert_eq!(retry.base_delay, Duration::from_millis(5));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.reconcile_timeout().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<Config>("readOnly: true").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            max_concurrent_reconciles: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            reconcile_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            artifact_alias: "dir/latest.tar.gz".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
