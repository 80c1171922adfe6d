//! Anvil CLI
//!
//! Runs, validates and shows pipeline definitions on the local host.

mod commands;
mod config;

use clap::Parser;
use colored::*;
use commands::{Commands, EXIT_ERROR, handle_command};
use config::RunnerArgs;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "Anvil single-host pipeline executor", long_about = None)]
struct Cli {
    #[command(flatten)]
    runner: RunnerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anvil=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match handle_command(cli.command, &cli.runner).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "anvil",
            "run",
            "hoard.lua",
            "release.json",
            "--json",
            "--runtime",
            "host",
            "--gate-policy",
            "reject",
        ])
        .unwrap();

        let Commands::Run { files, json } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(files, [PathBuf::from("hoard.lua"), PathBuf::from("release.json")]);
        assert!(json);
        assert_eq!(cli.runner.runtime, Some(anvil_runner::RuntimeKind::Host));
        assert_eq!(cli.runner.gate_policy, Some(anvil_runner::GatePolicy::Reject));
    }

    #[test]
    fn test_run_requires_files() {
        assert!(Cli::try_parse_from(["anvil", "run"]).is_err());
        assert!(Cli::try_parse_from(["anvil", "show", "hoard.lua", "--runtime", "docker"]).is_err());
    }
}
