//! CLI command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;
use std::sync::Arc;

use crate::accessor::Accessor;
use crate::builder::StorageBuilderFactory;
use crate::config::{CONFIG_KEYS, Config, ConfigLoader, get_config_value};
use crate::controller::{Controller, ControllerOptions};
use crate::events::LogRecorder;
use crate::kube::{KubeAccessor, create_client};
use crate::reconciler::HelmChartReconciler;
use crate::storage::LocalStorage;
use crate::watcher::{DependencyIndex, IndexedRepositories, Propagator, ResourceWatcher};

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Get configuration value
    Get {
        /// Configuration key (e.g., "storageAddress", "retry.maxDelay")
        key: Option<String>,
    },
    /// List all configuration
    List,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

/// Handle configuration subcommands
pub fn handle_config_command(cmd: ConfigSubcommand, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        ConfigSubcommand::Get { key } => {
            let config = ConfigLoader::load(config_path).context("Failed to load configuration")?;

            if let Some(key) = key {
                let value = get_config_value(&config, &key)?;
                println!("{}", value);
            } else {
                for key in CONFIG_KEYS {
                    println!("{}: {}", key, get_config_value(&config, key)?);
                }
            }
        }
        ConfigSubcommand::List => {
            let config = ConfigLoader::load(config_path).context("Failed to load configuration")?;
            let yaml =
                serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
            print!("{}", yaml);
        }
        ConfigSubcommand::Path => {
            println!("{}", ConfigLoader::config_path(config_path).display());
        }
        ConfigSubcommand::Validate => match ConfigLoader::validate(config_path) {
            Ok(_) => {
                println!("Configuration is valid");
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Run the HelmChart controller until interrupted
pub async fn run_controller(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let namespace = config.namespace();

    tracing::debug!("Initializing Kubernetes client");
    let client = create_client().await?;

    let storage = LocalStorage::new(config.storage_root(), &config.storage_address)
        .context("Failed to open artifact storage")?;
    tracing::info!(
        path = %storage.root().display(),
        address = %config.storage_address,
        "Artifact storage ready"
    );

    let accessor: Arc<dyn Accessor> =
        Arc::new(KubeAccessor::new(client.clone(), &config.field_manager));
    let index = DependencyIndex::new();
    let propagator = Arc::new(Propagator::new(index.clone()));
    let repositories = Arc::new(IndexedRepositories::new(index, Arc::clone(&accessor)));
    let builders = Arc::new(StorageBuilderFactory::new(storage.root(), repositories));

    let reconciler = HelmChartReconciler::new(
        Arc::clone(&accessor),
        Arc::new(storage),
        builders,
        Arc::new(LogRecorder::new()),
    )
    .with_alias(&config.artifact_alias);

    let controller = Controller::new(
        Arc::new(reconciler),
        propagator,
        config.retry_policy()?,
        ControllerOptions {
            workers: config.max_concurrent_reconciles,
            reconcile_timeout: config.reconcile_timeout()?,
        },
    );

    let (mut watcher, events) = ResourceWatcher::new(client, namespace.clone());
    watcher.watch_all()?;

    if let Err(e) = controller.resync(accessor.as_ref(), namespace.as_deref()).await {
        tracing::warn!(
            error = %format!("{:#}", e),
            "Initial resync failed, relying on watch events"
        );
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    controller.run(events, shutdown).await?;

    watcher.stop();
    Ok(())
}
