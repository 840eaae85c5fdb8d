//! chartsource - HelmChart artifact controller
//!
//! Watches HelmChart objects and their sources and keeps a packaged chart
//! artifact published for each of them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chartsource::cli::{self, ConfigSubcommand};
use chartsource::config::ConfigLoader;

/// HelmChart artifact controller for Flux sources
#[derive(Parser, Debug)]
#[command(name = "chartsource", version)]
#[command(
    about = "Builds, stores and advertises Helm chart artifacts for Flux HelmChart objects",
    long_about = None
)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Configuration file (defaults to the file under the config directory)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller (default)
    Run,
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Config { subcommand } => {
            cli::handle_config_command(subcommand, args.config.as_deref())
        }
        Command::Run => {
            let config = ConfigLoader::load(args.config.as_deref())
                .context("Failed to load configuration")?;
            cli::init_logging(&config.logger.level, args.debug, args.log_file.as_deref())?;

            if let Some(ref log_path) = args.log_file {
                eprintln!("Logs written to: {}", log_path.display());
            }
            tracing::debug!(
                storage = %config.storage_root().display(),
                namespace = config.namespace().as_deref().unwrap_or("*"),
                workers = config.max_concurrent_reconciles,
                "Configuration loaded"
            );

            cli::run_controller(config).await
        }
    }
}
