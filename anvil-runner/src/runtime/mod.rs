//! Agent runtimes
//!
//! A runtime is the external collaborator that actually isolates a run:
//! it provisions an environment for an image, executes shell commands in
//! it, and tears it down. The rest of the runner only sees this trait.

mod host;
mod podman;

pub use host::HostRuntime;
pub use podman::{PodmanRuntime, check_podman_available};

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Handle to a provisioned environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    /// Run that owns this environment
    pub run_id: Uuid,
    /// Runtime-specific handle (container name for podman)
    pub handle: String,
    pub image: String,
    /// Host directory holding the run's files
    pub workspace: PathBuf,
}

/// Result of a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Container (or container-like) runtime used to isolate runs
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Starts a fresh environment for `image` with `workspace` mounted
    ///
    /// # Arguments
    /// * `run_id` - The run the environment belongs to
    /// * `image` - Image identifier from the agent spec
    /// * `args` - Extra runtime arguments from the agent spec
    /// * `workspace` - Existing host directory for the run's files
    async fn provision(
        &self,
        run_id: Uuid,
        image: &str,
        args: &[String],
        workspace: &Path,
    ) -> Result<ExecutionEnvironment>;

    /// Runs a shell command inside the environment
    ///
    /// Dropping the returned future kills the command.
    async fn exec(&self, env: &ExecutionEnvironment, command: &str) -> Result<ExecOutput>;

    /// Stops and removes the environment
    async fn teardown(&self, env: &ExecutionEnvironment) -> Result<()>;
}

/// Which runtime the runner uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Podman,
    Host,
}

impl RuntimeKind {
    /// Instantiates the runtime
    pub fn build(&self) -> Arc<dyn AgentRuntime> {
        match self {
            RuntimeKind::Podman => Arc::new(PodmanRuntime::new()),
            RuntimeKind::Host => Arc::new(HostRuntime::new()),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "podman" => Ok(RuntimeKind::Podman),
            "host" => Ok(RuntimeKind::Host),
            other => Err(format!(
                "unknown runtime '{}', expected 'podman' or 'host'",
                other
            )),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Podman => write!(f, "podman"),
            RuntimeKind::Host => write!(f, "host"),
        }
    }
}
