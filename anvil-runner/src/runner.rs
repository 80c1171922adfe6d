//! Pipeline runner
//!
//! Drives one run from start to finish:
//! gate (acquire) → provision → stages → post-run → gate (release).
//!
//! Only gate and provisioning errors end a run early. Once an environment
//! exists, the post-run handler always runs and the run ends in a report.
//!
//! [`PipelineRunner::cancel`] stops every run at its next command boundary
//! (or interrupts the running command); cancelled runs still clean up.

use anvil_core::RunError;
use anvil_core::domain::pipeline::PipelineSpec;
use anvil_core::domain::run::RunReport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::config::RunnerConfig;
use crate::context::RunContext;
use crate::executor::{RunState, StageExecutor};
use crate::gate::ConcurrencyGate;
use crate::post_run::PostRunHandler;
use crate::provisioner::AgentProvisioner;
use crate::runtime::AgentRuntime;

pub struct PipelineRunner {
    config: RunnerConfig,
    gate: Arc<ConcurrencyGate>,
    provisioner: Arc<AgentProvisioner>,
    executor: StageExecutor,
    post_run: PostRunHandler,
    cancelled: watch::Sender<bool>,
}

impl PipelineRunner {
    /// Creates a runner
    ///
    /// # Arguments
    /// * `config` - Runner configuration
    /// * `runtime` - Runtime that isolates runs
    /// * `store` - Destination for archived artifacts
    pub fn new(
        config: RunnerConfig,
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let gate = Arc::new(ConcurrencyGate::new(config.gate_policy));
        let provisioner = Arc::new(AgentProvisioner::new(
            Arc::clone(&runtime),
            config.workspace_base.clone(),
        ));

        let (cancelled, cancel_rx) = watch::channel(false);

        Self {
            executor: StageExecutor::new(runtime, cancel_rx),
            post_run: PostRunHandler::new(store),
            provisioner,
            gate,
            config,
            cancelled,
        }
    }

    /// Creates a runner with the configured runtime and a filesystem store
    pub fn from_config(config: RunnerConfig) -> Self {
        let runtime = config.runtime.build();
        let store = Arc::new(FsArtifactStore::new(config.archive_dir.clone()));
        Self::new(config, runtime, store)
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Cancels every current and future run of this runner
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Timeout for a run of `spec`; the pipeline's own timeout wins
    pub fn timeout_for(&self, spec: &PipelineSpec) -> Duration {
        spec.options
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.run_timeout)
    }

    /// Executes one run of a pipeline
    pub async fn run(&self, spec: &PipelineSpec) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = RunContext::new(run_id, spec.name.as_str());

        info!("Starting run {} of pipeline '{}'", run_id, spec.name);
        ctx.log_info(format!("Run {} of pipeline '{}'", run_id, spec.name));

        // Released on every exit path below, at the latest when dropped
        let mut token = if spec.options.disable_concurrent_builds {
            Some(self.gate.acquire(&spec.name).await.inspect_err(|e| {
                error!("Run {}: {}", run_id, e);
            })?)
        } else {
            info!("Pipeline '{}' allows concurrent builds", spec.name);
            None
        };

        if self.is_cancelled() {
            info!("Run {} of '{}' cancelled before provisioning", run_id, spec.name);
            return Err(RunError::Cancelled(spec.name.clone()));
        }

        // Torn down by the post-run handler, or on drop if this future is dropped
        let lease = self.provisioner.provision(run_id, &spec.agent).await?;
        ctx.log_info(format!(
            "Provisioned {} environment {}",
            self.provisioner.runtime().name(),
            lease.environment().handle
        ));

        let timeout = self.timeout_for(spec);
        let deadline = Instant::now().checked_add(timeout);
        if deadline.is_none() {
            warn!(
                "Run {}: timeout of {}s is out of range, running without a deadline",
                run_id,
                timeout.as_secs()
            );
        }

        let mut state = RunState::new(lease);
        let outcome = self
            .executor
            .execute(&spec.stages, &mut state, &ctx, deadline)
            .await;

        let summary = self.post_run.run(spec, state, &outcome, &ctx).await;

        if let Some(token) = token.as_mut() {
            self.gate.release(token);
        }

        info!("Run {} of '{}' finished: {}", run_id, spec.name, outcome);
        ctx.log_info(format!("Finished: {}", outcome));

        Ok(RunReport {
            run_id,
            pipeline: spec.name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            archival: summary.archival,
            artifacts: summary.artifacts,
            warnings: summary.warnings,
            logs: ctx.drain_logs(),
        })
    }

    /// Runs several pipelines concurrently, at most `max_parallel_runs` at a time
    ///
    /// Results are returned in the order of `specs`.
    pub async fn run_all(
        self: &Arc<Self>,
        specs: Vec<PipelineSpec>,
    ) -> Vec<Result<RunReport, RunError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_runs));
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            let runner = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                runner.run(&spec).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        results
    }
}
