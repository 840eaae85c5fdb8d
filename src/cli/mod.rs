//! CLI command handling module
//!
//! Handles all CLI subcommands and logging setup.

mod commands;
mod logging;

pub use commands::{ConfigSubcommand, handle_config_command, run_controller};
pub use logging::init_logging;
