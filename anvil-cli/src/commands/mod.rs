//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod definition;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::RunnerArgs;

/// Every run succeeded, or the definitions are valid
pub const EXIT_SUCCESS: u8 = 0;
/// At least one run ended in a failed stage
pub const EXIT_RUN_FAILED: u8 = 1;
/// A definition, provisioning, gate or cancellation error stopped a run
pub const EXIT_ERROR: u8 = 2;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more pipelines
    Run {
        /// Pipeline definition files (.lua or .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the run reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check pipeline definitions without running them
    Validate {
        /// Pipeline definition files (.lua or .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a parsed pipeline definition
    Show {
        /// Pipeline definition file (.lua or .json)
        file: PathBuf,

        /// Print the definition as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `args` - Runner flags shared by all commands
///
/// # Returns
/// The process exit code
pub async fn handle_command(command: Commands, args: &RunnerArgs) -> Result<u8> {
    match command {
        Commands::Run { files, json } => run::handle_run(&files, json, args).await,
        Commands::Validate { files } => Ok(definition::handle_validate(&files)),
        Commands::Show { file, json } => definition::handle_show(&file, json),
    }
}
