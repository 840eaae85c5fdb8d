//! Default configuration values
//!
//! Serde defaults for the schema and the built-in configuration layer.

use super::schema::Config;

/// Public address used in artifact URLs
pub const DEFAULT_STORAGE_ADDRESS: &str = "localhost:9090";

/// Field manager for server-side apply status patches
pub const DEFAULT_FIELD_MANAGER: &str = "source-controller";

pub fn storage_address() -> String {
    DEFAULT_STORAGE_ADDRESS.to_string()
}

pub fn max_concurrent_reconciles() -> usize {
    2
}

pub fn reconcile_timeout() -> String {
    "5m".to_string()
}

pub fn retry_base_delay() -> String {
    "5ms".to_string()
}

pub fn retry_max_delay() -> String {
    "1000s".to_string()
}

pub fn log_level() -> String {
    "info".to_string()
}

pub fn artifact_alias() -> String {
    crate::reconciler::DEFAULT_ARTIFACT_ALIAS.to_string()
}

pub fn field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

/// Get the default configuration
pub fn default_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.max_concurrent_reconciles, 2);
        assert_eq!(config.reconcile_timeout, "5m");
        assert_eq!(config.artifact_alias, "latest.tar.gz");
        assert_eq!(config.field_manager, "source-controller");
    }
}
