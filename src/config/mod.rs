//! Configuration system
//!
//! Layered configuration: built-in defaults, a YAML config file and
//! `CHARTSOURCE_*` environment overrides.

mod defaults;
pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{Config, LoggerConfig, RetryConfig};

/// Every key `get_config_value` understands, in display order
pub const CONFIG_KEYS: &[&str] = &[
    "storagePath",
    "storageAddress",
    "watchNamespace",
    "maxConcurrentReconciles",
    "reconcileTimeout",
    "retry.baseDelay",
    "retry.maxDelay",
    "logger.level",
    "artifactAlias",
    "fieldManager",
];

/// Get a configuration value by key (dot notation)
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    match key {
        "storagePath" => Ok(config.storage_root().display().to_string()),
        "storageAddress" => Ok(config.storage_address.clone()),
        "watchNamespace" => Ok(config.watch_namespace.clone()),
        "maxConcurrentReconciles" => Ok(config.max_concurrent_reconciles.to_string()),
        "reconcileTimeout" => Ok(config.reconcile_timeout.clone()),
        "retry.baseDelay" => Ok(config.retry.base_delay.clone()),
        "retry.maxDelay" => Ok(config.retry.max_delay.clone()),
        "logger.level" => Ok(config.logger.level.clone()),
        "artifactAlias" => Ok(config.artifact_alias.clone()),
        "fieldManager" => Ok(config.field_manager.clone()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_key_resolves() {
        let config = Config::default();
        for key in CONFIG_KEYS {
            assert!(get_config_value(&config, key).is_ok(), "{key}");
        }
        assert_eq!(get_config_value(&config, "retry.maxDelay").unwrap(), "1000s");
        assert!(get_config_value(&config, "readOnly").is_err());
    }
}
