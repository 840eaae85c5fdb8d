//! Configuration loading and merging logic
//!
//! Handles loading configuration from multiple sources and merging them
//! according to precedence rules.

use super::{defaults, paths, schema::Config};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    ///
    /// Precedence order (highest to lowest):
    /// 1. Environment variable overrides
    /// 2. Config file (`path`, or the root config if it exists)
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let root = paths::root_config_path();
                if root.exists() {
                    Self::load_file(&root)?
                } else {
                    Self::load_defaults()
                }
            }
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Path of the config file `load` reads
    pub fn config_path(path: Option<&Path>) -> PathBuf {
        path.map(Path::to_path_buf)
            .unwrap_or_else(paths::root_config_path)
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration by loading and checking for errors
    ///
    /// This performs strict validation - it will fail on:
    /// - Invalid YAML syntax
    /// - Unknown configuration keys
    /// - Invalid value types or durations
    /// - File read errors
    pub fn validate(path: Option<&Path>) -> Result<Config> {
        let config = Self::load(path).context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load default configuration
    pub fn load_defaults() -> Config {
        defaults::default_config()
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(
        config: &mut Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(path) = lookup("CHARTSOURCE_STORAGE_PATH") {
            config.storage_path = path;
        }
        if let Some(address) = lookup("CHARTSOURCE_STORAGE_ADDRESS") {
            config.storage_address = address;
        }
        if let Some(namespace) = lookup("CHARTSOURCE_WATCH_NAMESPACE") {
            config.watch_namespace = namespace;
        }
        if let Some(workers) = lookup("CHARTSOURCE_MAX_CONCURRENT_RECONCILES") {
            config.max_concurrent_reconciles = workers
                .parse()
                .context("CHARTSOURCE_MAX_CONCURRENT_RECONCILES must be a number")?;
        }
        if let Some(level) = lookup("CHARTSOURCE_LOG_LEVEL") {
            config.logger.level = level;
        }
        Ok(())
    }
}
