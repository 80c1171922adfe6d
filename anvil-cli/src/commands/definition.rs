//! Definition command handlers
//!
//! `validate` and `show` load definitions without touching any runtime.

use anvil_core::domain::pipeline::PipelineSpec;
use anvil_runner::load_pipeline_file;
use anyhow::Result;
use colored::*;
use std::path::{Path, PathBuf};

use super::{EXIT_ERROR, EXIT_SUCCESS};

/// Loads every file and reports whether it is valid
pub fn handle_validate(files: &[PathBuf]) -> u8 {
    let mut code = EXIT_SUCCESS;

    for file in files {
        match load_pipeline_file(file) {
            Ok(spec) => println!(
                "{} {} ({}, {} stage(s), {} step(s))",
                "✓".green().bold(),
                file.display(),
                spec.name.bold(),
                spec.stages.len(),
                spec.step_count()
            ),
            Err(e) => {
                println!("{} {}: {}", "✗".red().bold(), file.display(), e);
                code = EXIT_ERROR;
            }
        }
    }

    code
}

/// Prints a parsed definition
pub fn handle_show(file: &Path, json: bool) -> Result<u8> {
    let spec = match load_pipeline_file(file) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{} {}: {}", "✗".red().bold(), file.display(), e);
            return Ok(EXIT_ERROR);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&spec)?);
    } else {
        print_pipeline_details(&spec);
    }

    Ok(EXIT_SUCCESS)
}

/// Print detailed pipeline information
fn print_pipeline_details(spec: &PipelineSpec) {
    println!("{}", "Pipeline Details:".bold());
    println!("  Name:        {}", spec.name.bold());
    println!("  Image:       {}", spec.agent.image.cyan());
    if !spec.agent.args.is_empty() {
        println!("  Agent args:  {}", spec.agent.args.join(" ").dimmed());
    }
    println!(
        "  Concurrent:  {}",
        if spec.options.disable_concurrent_builds {
            "disabled"
        } else {
            "allowed"
        }
    );
    if let Some(timeout) = spec.options.timeout_seconds {
        println!("  Timeout:     {}s", timeout);
    }

    println!("\n{}", "Stages:".bold());
    for (index, stage) in spec.stages.iter().enumerate() {
        println!("  {} {}. {}", "▸".cyan(), index + 1, stage.name.bold());
        for step in &stage.steps {
            println!("      {}", step.dimmed());
        }
    }

    println!("\n{}", "Post:".bold());
    match &spec.post.artifacts {
        Some(pattern) => println!(
            "  Artifacts:   {} (trigger: {}, fingerprint: {})",
            pattern.cyan(),
            spec.post.trigger,
            spec.post.fingerprint
        ),
        None => println!("  Artifacts:   {}", "none".dimmed()),
    }
    println!("  Cleanup:     {}", spec.post.cleanup_workspace);
}
