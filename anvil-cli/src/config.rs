//! Configuration module
//!
//! Merges command-line flags over the runner configuration read from the
//! environment.

use anvil_runner::{GatePolicy, RunnerConfig, RuntimeKind};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Flags shared by every command
#[derive(Args, Debug, Default)]
pub struct RunnerArgs {
    /// Directory under which run workspaces are created
    #[arg(long, env = "ANVIL_WORKSPACE_BASE", global = true)]
    pub workspace_base: Option<PathBuf>,

    /// Directory receiving archived artifacts
    #[arg(long, env = "ANVIL_ARCHIVE_DIR", global = true)]
    pub archive_dir: Option<PathBuf>,

    /// Runtime isolating runs (podman or host)
    #[arg(long, env = "ANVIL_RUNTIME", global = true)]
    pub runtime: Option<RuntimeKind>,

    /// What to do when a pipeline already has an active run (queue or reject)
    #[arg(long, env = "ANVIL_GATE_POLICY", global = true)]
    pub gate_policy: Option<GatePolicy>,

    /// Default run timeout in seconds
    #[arg(long, env = "ANVIL_RUN_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Max runs executing at the same time
    #[arg(long, env = "ANVIL_MAX_PARALLEL_RUNS", global = true)]
    pub max_parallel: Option<usize>,
}

impl RunnerArgs {
    /// Builds the runner configuration: environment first, flags override
    pub fn load(&self) -> Result<RunnerConfig> {
        let config = self.apply(RunnerConfig::from_env()?);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: RunnerConfig) -> RunnerConfig {
        if let Some(dir) = &self.workspace_base {
            config.workspace_base = dir.clone();
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = dir.clone();
        }
        if let Some(runtime) = self.runtime {
            config.runtime = runtime;
        }
        if let Some(policy) = self.gate_policy {
            config.gate_policy = policy;
        }
        if let Some(seconds) = self.timeout {
            config.run_timeout = Duration::from_secs(seconds);
        }
        if let Some(max) = self.max_parallel {
            config.max_parallel_runs = max;
        }
        config
    }
}
