//! Run command handler
//!
//! Loads every definition up front, runs the pipelines concurrently and
//! prints one report per run. Ctrl-C cancels the runs, which still tear
//! down their environments before the reports are printed.

use anvil_core::RunError;
use anvil_core::domain::log::{LogEntry, LogLevel};
use anvil_core::domain::run::{RunOutcome, RunReport};
use anvil_runner::runtime::check_podman_available;
use anvil_runner::{PipelineRunner, RuntimeKind, load_pipeline_file};
use anyhow::{Context, Result};
use colored::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{EXIT_ERROR, EXIT_RUN_FAILED, EXIT_SUCCESS};
use crate::config::RunnerArgs;

/// Runs the given pipeline files
///
/// Nothing runs if any file fails to load.
pub async fn handle_run(files: &[PathBuf], json: bool, args: &RunnerArgs) -> Result<u8> {
    let mut specs = Vec::with_capacity(files.len());
    let mut load_failed = false;

    for file in files {
        match load_pipeline_file(file) {
            Ok(spec) => specs.push(spec),
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red().bold(), file.display(), e);
                load_failed = true;
            }
        }
    }

    if load_failed {
        return Ok(EXIT_ERROR);
    }

    let config = args.load()?;
    if config.runtime == RuntimeKind::Podman {
        check_podman_available()
            .await
            .context("The podman runtime is not usable (use --runtime host to run on the host)")?;
    }

    info!(
        "Running {} pipeline(s) with the {} runtime (gate policy: {}, max parallel: {})",
        specs.len(),
        config.runtime,
        config.gate_policy,
        config.max_parallel_runs
    );

    let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
    let runner = Arc::new(PipelineRunner::from_config(config));
    let runs = runner.run_all(specs);
    tokio::pin!(runs);

    let results = tokio::select! {
        results = &mut runs => results,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    eprintln!(
                        "{} Interrupted, cancelling runs and cleaning up",
                        "⚠".yellow()
                    );
                    runner.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
            runs.await
        }
    };

    if json {
        let output: Vec<serde_json::Value> = names
            .iter()
            .zip(&results)
            .map(|(name, result)| match result {
                Ok(report) => serde_json::to_value(report),
                Err(e) => Ok(json!({ "pipeline": name, "error": e.to_string() })),
            })
            .collect::<Result<_, _>>()?;
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (name, result) in names.iter().zip(&results) {
            match result {
                Ok(report) => print_report(report),
                Err(e) => println!("{} {}: {}\n", "✗".red().bold(), name.bold(), e),
            }
        }
    }

    Ok(exit_code(&results))
}

/// Aggregated exit code: errors beat failed runs, failed runs beat success
pub fn exit_code(results: &[Result<RunReport, RunError>]) -> u8 {
    if results.iter().any(|r| r.is_err()) {
        EXIT_ERROR
    } else if results
        .iter()
        .any(|r| r.as_ref().is_ok_and(|report| !report.succeeded()))
    {
        EXIT_RUN_FAILED
    } else {
        EXIT_SUCCESS
    }
}

/// Print a run report
fn print_report(report: &RunReport) {
    let status = match &report.outcome {
        RunOutcome::Succeeded => "✓ Succeeded".green().bold(),
        RunOutcome::Failed { .. } => "✗ Failed".red().bold(),
    };

    println!("{} {}", status, report.pipeline.bold());
    println!("  Run ID:    {}", report.run_id.to_string().cyan());
    println!(
        "  Started:   {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Duration:  {}s", report.duration().num_seconds());
    if let RunOutcome::Failed { .. } = report.outcome {
        println!("  Outcome:   {}", report.outcome.to_string().red());
    }

    if !report.artifacts.is_empty() {
        println!("  Artifacts:");
        for artifact in &report.artifacts {
            println!(
                "    - {} ({} bytes) {}",
                artifact.path.cyan(),
                artifact.size,
                artifact.sha256.as_deref().unwrap_or_default().dimmed()
            );
        }
    }

    for warning in &report.warnings {
        println!("  {} {}", "⚠".yellow(), warning.to_string().yellow());
    }

    if !report.logs.is_empty() {
        println!("  {}", "Logs:".bold());
        for log in &report.logs {
            print_log_entry(log);
        }
    }
    println!();
}

fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "    {} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}
