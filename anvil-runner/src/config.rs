//! Runner configuration
//!
//! Defines the configurable parameters of the runner: where workspaces and
//! archives live, which runtime isolates runs, how the concurrency gate
//! behaves, and the default run timeout.

use std::path::PathBuf;
use std::time::Duration;

use crate::gate::GatePolicy;
use crate::runtime::RuntimeKind;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory under which per-run workspaces are created
    pub workspace_base: PathBuf,

    /// Directory receiving archived artifacts
    pub archive_dir: PathBuf,

    /// Runtime used to isolate runs
    pub runtime: RuntimeKind,

    /// Behavior when a pipeline already has an active run
    pub gate_policy: GatePolicy,

    /// Run timeout used when the pipeline does not set one
    pub run_timeout: Duration,

    /// Max runs executing at the same time
    pub max_parallel_runs: usize,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(workspace_base: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            workspace_base,
            archive_dir,
            runtime: RuntimeKind::default(),
            gate_policy: GatePolicy::default(),
            run_timeout: Duration::from_secs(3600), // 1 hour
            max_parallel_runs: 2,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ANVIL_WORKSPACE_BASE (default: `<tmp>/anvil/workspaces`)
    /// - ANVIL_ARCHIVE_DIR (default: `./anvil-archive`)
    /// - ANVIL_RUNTIME (`podman` | `host`, default: podman)
    /// - ANVIL_GATE_POLICY (`queue` | `reject`, default: queue)
    /// - ANVIL_RUN_TIMEOUT (seconds, default: 3600)
    /// - ANVIL_MAX_PARALLEL_RUNS (default: 2)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ANVIL_WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("ANVIL_ARCHIVE_DIR") {
            config.archive_dir = PathBuf::from(dir);
        }

        if let Ok(runtime) = std::env::var("ANVIL_RUNTIME") {
            config.runtime = runtime
                .parse()
                .map_err(|e| anyhow::anyhow!("ANVIL_RUNTIME: {}", e))?;
        }

        if let Ok(policy) = std::env::var("ANVIL_GATE_POLICY") {
            config.gate_policy = policy
                .parse()
                .map_err(|e| anyhow::anyhow!("ANVIL_GATE_POLICY: {}", e))?;
        }

        config.run_timeout = std::env::var("ANVIL_RUN_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.run_timeout);

        config.max_parallel_runs = std::env::var("ANVIL_MAX_PARALLEL_RUNS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.max_parallel_runs);

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        if self.archive_dir.as_os_str().is_empty() {
            anyhow::bail!("archive_dir cannot be empty");
        }

        if self.run_timeout.is_zero() {
            anyhow::bail!("run_timeout must be greater than 0");
        }

        if self.max_parallel_runs == 0 {
            anyhow::bail!("max_parallel_runs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(
            std::env::temp_dir().join("anvil").join("workspaces"),
            PathBuf::from("anvil-archive"),
        )
    }
}
