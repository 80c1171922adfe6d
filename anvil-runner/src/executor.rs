//! Stage executor
//!
//! Runs the stages of a pipeline in declaration order inside a provisioned
//! environment. The first failing command ends the run; its stage and cause
//! become the run outcome. Nothing in here returns an error: every failure
//! is outcome data, so the post-run handler always gets to clean up.

use anvil_core::domain::log::LogLevel;
use anvil_core::domain::pipeline::StageSpec;
use anvil_core::domain::run::{RunOutcome, RunStatus, StageFailureCause};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::provisioner::EnvironmentLease;
use crate::runtime::{AgentRuntime, ExecutionEnvironment};

/// Transient state of one run, owned by that run only
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub lease: EnvironmentLease,
}

impl RunState {
    pub fn new(lease: EnvironmentLease) -> Self {
        Self {
            run_id: lease.environment().run_id,
            status: RunStatus::Pending,
            lease,
        }
    }

    pub fn environment(&self) -> &ExecutionEnvironment {
        self.lease.environment()
    }
}

pub struct StageExecutor {
    runtime: Arc<dyn AgentRuntime>,
    cancelled: watch::Receiver<bool>,
}

impl StageExecutor {
    /// Creates an executor that stops runs once `cancelled` turns true
    pub fn new(runtime: Arc<dyn AgentRuntime>, cancelled: watch::Receiver<bool>) -> Self {
        Self { runtime, cancelled }
    }

    /// Runs all stages and records the terminal status in `state`
    ///
    /// # Arguments
    /// * `stages` - Stages in declaration order
    /// * `state` - Run state; ends in `Succeeded` or `Failed`
    /// * `ctx` - Run context collecting the run log
    /// * `deadline` - Point in time at which the run is timed out
    pub async fn execute(
        &self,
        stages: &[StageSpec],
        state: &mut RunState,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> RunOutcome {
        let outcome = self.run_stages(stages, state, ctx, deadline).await;
        state.status = outcome.clone().into();
        outcome
    }

    async fn run_stages(
        &self,
        stages: &[StageSpec],
        state: &mut RunState,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> RunOutcome {
        for (index, stage) in stages.iter().enumerate() {
            let number = index + 1;

            if *self.cancelled.borrow() {
                return fail(ctx, number, stage, StageFailureCause::Cancelled { command: None });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return fail(ctx, number, stage, StageFailureCause::TimedOut { command: None });
            }

            state.status = RunStatus::Running { stage: number };
            info!(
                "{} run {}: starting stage {} ({})",
                ctx.pipeline, state.run_id, number, stage.name
            );
            ctx.log_info(format!("Starting stage {}: {}", number, stage.name));

            if let Err(cause) = self.run_stage(stage, state.environment(), ctx, deadline).await {
                return fail(ctx, number, stage, cause);
            }

            ctx.log_info(format!("Stage {} ({}) completed", number, stage.name));
        }

        info!(
            "{} run {}: all {} stages succeeded",
            ctx.pipeline,
            state.run_id,
            stages.len()
        );
        RunOutcome::Succeeded
    }

    /// Runs the commands of one stage, stopping at the first failure
    async fn run_stage(
        &self,
        stage: &StageSpec,
        env: &ExecutionEnvironment,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> Result<(), StageFailureCause> {
        for command in &stage.steps {
            debug!("Stage {}: running `{}`", stage.name, command);
            ctx.log_debug(format!("$ {}", command));

            let exec = self.runtime.exec(env, command);
            let bounded = async {
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, exec).await.ok(),
                    None => Some(exec.await),
                }
            };

            let result = tokio::select! {
                result = bounded => match result {
                    Some(result) => result,
                    None => {
                        return Err(StageFailureCause::TimedOut {
                            command: Some(command.clone()),
                        });
                    }
                },
                _ = cancellation(self.cancelled.clone()) => {
                    return Err(StageFailureCause::Cancelled {
                        command: Some(command.clone()),
                    });
                }
            };

            let output = result.map_err(|e| StageFailureCause::ExecError {
                command: command.clone(),
                message: format!("{:#}", e),
            })?;

            ctx.log_output(LogLevel::Info, &output.stdout);
            ctx.log_output(LogLevel::Error, &output.stderr);

            if !output.success() {
                return Err(StageFailureCause::CommandFailed {
                    command: command.clone(),
                    exit_code: output.exit_code,
                });
            }
        }

        Ok(())
    }
}

/// Resolves once the run is cancelled, never if the sender is gone
async fn cancellation(mut cancelled: watch::Receiver<bool>) {
    let closed = cancelled.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn fail(ctx: &RunContext, number: usize, stage: &StageSpec, cause: StageFailureCause) -> RunOutcome {
    warn!("Stage {} ({}) failed: {}", number, stage.name, cause);
    ctx.log_error(format!("Stage {} ({}) failed: {}", number, stage.name, cause));
    RunOutcome::Failed {
        stage: number,
        stage_name: stage.name.clone(),
        cause,
    }
}
