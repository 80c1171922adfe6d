//! Agent provisioner
//!
//! Creates the per-run workspace, asks the runtime for a fresh environment
//! and tears it down again. A provisioned environment is handed out as an
//! [`EnvironmentLease`]: `teardown` consumes it, and a lease dropped without
//! teardown (a cancelled run future) schedules the teardown on the tokio
//! runtime. Either way the environment is torn down at most once.

use anvil_core::ProvisionError;
use anvil_core::domain::pipeline::AgentSpec;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::runtime::{AgentRuntime, ExecutionEnvironment};

/// A provisioned environment that must be torn down
pub struct EnvironmentLease {
    environment: ExecutionEnvironment,
    runtime: Arc<dyn AgentRuntime>,
    armed: bool,
}

impl std::fmt::Debug for EnvironmentLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentLease")
            .field("environment", &self.environment)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl EnvironmentLease {
    pub fn new(runtime: Arc<dyn AgentRuntime>, environment: ExecutionEnvironment) -> Self {
        Self {
            environment,
            runtime,
            armed: true,
        }
    }

    pub fn environment(&self) -> &ExecutionEnvironment {
        &self.environment
    }

    /// Tears the environment down
    pub async fn teardown(mut self) -> Result<()> {
        // Disarmed first: a teardown interrupted halfway is not retried on drop
        self.armed = false;
        let env = &self.environment;
        info!("Tearing down environment {} for run {}", env.handle, env.run_id);
        self.runtime
            .teardown(env)
            .await
            .with_context(|| format!("Failed to tear down environment {}", env.handle))
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(
                    "Environment {} dropped outside a tokio runtime, it must be removed by hand",
                    self.environment.handle
                );
                return;
            }
        };

        warn!(
            "Run {} ended without teardown, removing environment {}",
            self.environment.run_id, self.environment.handle
        );
        let runtime = Arc::clone(&self.runtime);
        let env = self.environment.clone();
        handle.spawn(async move {
            match runtime.teardown(&env).await {
                Ok(()) => debug!("Environment {} removed", env.handle),
                Err(e) => error!("Failed to tear down environment {}: {:#}", env.handle, e),
            }
        });
    }
}

pub struct AgentProvisioner {
    runtime: Arc<dyn AgentRuntime>,
    workspace_base: PathBuf,
}

impl AgentProvisioner {
    /// Creates a provisioner
    ///
    /// # Arguments
    /// * `runtime` - Runtime that creates the environments
    /// * `workspace_base` - Directory under which run workspaces are created
    pub fn new(runtime: Arc<dyn AgentRuntime>, workspace_base: PathBuf) -> Self {
        Self {
            runtime,
            workspace_base,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn AgentRuntime> {
        &self.runtime
    }

    /// Workspace directory for a run
    pub fn workspace_for(&self, run_id: Uuid) -> PathBuf {
        self.workspace_base.join(run_id.to_string())
    }

    /// Acquires a fresh environment for a run
    ///
    /// On failure the half-created workspace is removed again and nothing
    /// needs to be torn down.
    pub async fn provision(
        &self,
        run_id: Uuid,
        agent: &AgentSpec,
    ) -> Result<EnvironmentLease, ProvisionError> {
        let workspace = self.workspace_for(run_id);
        let unavailable = |reason: String| ProvisionError::EnvironmentUnavailable {
            image: agent.image.clone(),
            reason,
        };

        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            unavailable(format!(
                "failed to create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        info!(
            "Provisioning {} environment for run {} (image {})",
            self.runtime.name(),
            run_id,
            agent.image
        );

        match self
            .runtime
            .provision(run_id, &agent.image, &agent.args, &workspace)
            .await
        {
            Ok(env) => Ok(EnvironmentLease::new(Arc::clone(&self.runtime), env)),
            Err(e) => {
                error!("Failed to provision environment for run {}: {:#}", run_id, e);
                if let Err(cleanup_err) = remove_workspace(&workspace).await {
                    warn!("{:#}", cleanup_err);
                }
                Err(unavailable(format!("{:#}", e)))
            }
        }
    }
}

/// Removes a run workspace; a workspace that is already gone is fine
pub async fn remove_workspace(workspace: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove workspace {}", workspace.display())),
    }
}
