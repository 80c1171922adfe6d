//! Host runtime
//!
//! Runs commands directly on the host with the run workspace as working
//! directory. The only isolation is the per-run workspace; the image and
//! agent args are recorded but not used.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AgentRuntime, ExecOutput, ExecutionEnvironment};

#[derive(Debug, Clone, Default)]
pub struct HostRuntime;

impl HostRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentRuntime for HostRuntime {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn provision(
        &self,
        run_id: Uuid,
        image: &str,
        args: &[String],
        workspace: &Path,
    ) -> Result<ExecutionEnvironment> {
        if !workspace.is_dir() {
            anyhow::bail!("Workspace {} does not exist", workspace.display());
        }
        if !args.is_empty() {
            warn!("Host runtime ignores agent args: {:?}", args);
        }
        debug!(
            "Host environment for run {} in {} (image {} not used)",
            run_id,
            workspace.display(),
            image
        );

        Ok(ExecutionEnvironment {
            run_id,
            handle: format!("host-{}", run_id),
            image: image.to_string(),
            workspace: workspace.to_path_buf(),
        })
    }

    async fn exec(&self, env: &ExecutionEnvironment, command: &str) -> Result<ExecOutput> {
        debug!("Executing on host in {}: {}", env.workspace.display(), command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&env.workspace)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn sh for `{}`", command))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn teardown(&self, env: &ExecutionEnvironment) -> Result<()> {
        debug!("Host environment {} released", env.handle);
        Ok(())
    }
}
