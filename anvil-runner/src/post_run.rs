//! Post-run handler
//!
//! Runs after the stage executor, whatever the outcome:
//! 1. Archives artifacts if the trigger policy allows it
//! 2. Tears the environment down (exactly once)
//! 3. Removes the workspace when the pipeline asks for it
//!
//! Archival and cleanup problems are recorded as warnings. They never
//! change the run outcome.

use anvil_core::domain::pipeline::{ArchiveTrigger, PipelineSpec};
use anvil_core::domain::run::{ArchivalStatus, ArchivedArtifact, RunOutcome, RunWarning};
use std::sync::Arc;
use tracing::{info, warn};

use crate::artifacts::{ArchiveRequest, ArtifactStore, StoreOutcome};
use crate::context::RunContext;
use crate::executor::RunState;
use crate::provisioner::remove_workspace;

/// What post-run handling produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRunSummary {
    pub archival: ArchivalStatus,
    pub artifacts: Vec<ArchivedArtifact>,
    pub warnings: Vec<RunWarning>,
}

/// Whether artifacts are archived for this outcome
///
/// | outcome   | `success` | `always` |
/// |-----------|-----------|----------|
/// | Succeeded | archive   | archive  |
/// | Failed    | skip      | archive  |
pub fn should_archive(outcome: &RunOutcome, trigger: ArchiveTrigger) -> bool {
    match trigger {
        ArchiveTrigger::Always => true,
        ArchiveTrigger::OnSuccessOnly => outcome.is_success(),
    }
}

pub struct PostRunHandler {
    store: Arc<dyn ArtifactStore>,
}

impl PostRunHandler {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Archives artifacts and cleans up the run
    ///
    /// Consumes the run state: after this the environment no longer exists.
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        state: RunState,
        outcome: &RunOutcome,
        ctx: &RunContext,
    ) -> PostRunSummary {
        let mut summary = PostRunSummary {
            archival: ArchivalStatus::NotConfigured,
            artifacts: Vec::new(),
            warnings: Vec::new(),
        };

        if let Some(pattern) = spec.post.artifacts.as_deref() {
            if should_archive(outcome, spec.post.trigger) {
                summary.archival = ArchivalStatus::Attempted;
                self.archive(spec, &state, pattern, ctx, &mut summary).await;
            } else {
                summary.archival = ArchivalStatus::Skipped;
                info!(
                    "Skipping archival of '{}' (trigger: {}, outcome: {})",
                    pattern, spec.post.trigger, outcome
                );
                ctx.log_info(format!(
                    "Archival skipped: trigger '{}' does not cover this outcome",
                    spec.post.trigger
                ));
            }
        }

        self.cleanup(spec, state, ctx, &mut summary).await;
        summary
    }

    async fn archive(
        &self,
        spec: &PipelineSpec,
        state: &RunState,
        pattern: &str,
        ctx: &RunContext,
        summary: &mut PostRunSummary,
    ) {
        let request = ArchiveRequest {
            pipeline: spec.name.clone(),
            run_id: state.run_id,
            workspace: state.environment().workspace.clone(),
            pattern: pattern.to_string(),
            fingerprint: spec.post.fingerprint,
        };

        let warning = match self.store.store(&request).await {
            Ok(StoreOutcome::Stored(artifacts)) => {
                ctx.log_info(format!(
                    "Archived {} artifact(s) matching '{}'",
                    artifacts.len(),
                    pattern
                ));
                summary.artifacts = artifacts;
                return;
            }
            Ok(StoreOutcome::NothingMatched) => RunWarning::ArchivalNothingMatched {
                pattern: pattern.to_string(),
            },
            Err(e) => RunWarning::ArchivalFailed {
                pattern: pattern.to_string(),
                message: format!("{:#}", e),
            },
        };

        warn!("Run {}: {}", state.run_id, warning);
        ctx.log_warning(warning.to_string());
        summary.warnings.push(warning);
    }

    async fn cleanup(
        &self,
        spec: &PipelineSpec,
        state: RunState,
        ctx: &RunContext,
        summary: &mut PostRunSummary,
    ) {
        let workspace = state.environment().workspace.clone();
        let run_id = state.run_id;

        if let Err(e) = state.lease.teardown().await {
            record_cleanup_failure(ctx, summary, format!("{:#}", e));
        }

        if spec.post.cleanup_workspace {
            match remove_workspace(&workspace).await {
                Ok(()) => ctx.log_info(format!("Removed workspace {}", workspace.display())),
                Err(e) => record_cleanup_failure(ctx, summary, format!("{:#}", e)),
            }
        } else {
            info!("Run {}: keeping workspace {}", run_id, workspace.display());
        }
    }
}

fn record_cleanup_failure(ctx: &RunContext, summary: &mut PostRunSummary, message: String) {
    let warning = RunWarning::CleanupFailed { message };
    warn!("{}", warning);
    ctx.log_warning(warning.to_string());
    summary.warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::AgentProvisioner;
    use crate::testing::{RecordingStore, ScriptedRuntime, StoreBehavior};
    use anvil_core::domain::pipeline::{AgentSpec, PipelineOptions, PostActionSpec, StageSpec};
    use anvil_core::domain::run::StageFailureCause;
    use uuid::Uuid;

    struct Fixture {
        runtime: Arc<ScriptedRuntime>,
        store: Arc<RecordingStore>,
        handler: PostRunHandler,
        provisioner: Arc<AgentProvisioner>,
        _base: tempfile::TempDir,
    }

    fn fixture(runtime: ScriptedRuntime, behavior: StoreBehavior) -> Fixture {
        let base = tempfile::tempdir().unwrap();
        let runtime = Arc::new(runtime);
        let store = Arc::new(RecordingStore::new(behavior));
        let provisioner = Arc::new(AgentProvisioner::new(
            runtime.clone(),
            base.path().to_path_buf(),
        ));
        let handler = PostRunHandler::new(store.clone());
        Fixture {
            runtime,
            store,
            handler,
            provisioner,
            _base: base,
        }
    }

    fn spec(post: PostActionSpec) -> PipelineSpec {
        PipelineSpec {
            name: "hoard".to_string(),
            agent: AgentSpec {
                image: "rust:latest".to_string(),
                args: vec![],
            },
            options: PipelineOptions::default(),
            stages: vec![StageSpec {
                name: "Build".to_string(),
                steps: vec!["cargo build".to_string()],
            }],
            post,
        }
    }

    fn post(artifacts: Option<&str>, trigger: ArchiveTrigger, cleanup: bool) -> PostActionSpec {
        PostActionSpec {
            artifacts: artifacts.map(str::to_string),
            fingerprint: true,
            trigger,
            cleanup_workspace: cleanup,
        }
    }

    fn failed() -> RunOutcome {
        RunOutcome::Failed {
            stage: 1,
            stage_name: "Build".to_string(),
            cause: StageFailureCause::CommandFailed {
                command: "cargo build".to_string(),
                exit_code: 101,
            },
        }
    }

    async fn provisioned(f: &Fixture) -> RunState {
        let lease = f
            .provisioner
            .provision(Uuid::new_v4(), &spec(PostActionSpec::default()).agent)
            .await
            .unwrap();
        RunState::new(lease)
    }

    #[test]
    fn test_should_archive_table() {
        assert!(should_archive(&RunOutcome::Succeeded, ArchiveTrigger::OnSuccessOnly));
        assert!(should_archive(&RunOutcome::Succeeded, ArchiveTrigger::Always));
        assert!(!should_archive(&failed(), ArchiveTrigger::OnSuccessOnly));
        assert!(should_archive(&failed(), ArchiveTrigger::Always));
    }

    #[tokio::test]
    async fn test_success_archives_and_tears_down() {
        let f = fixture(ScriptedRuntime::new(), StoreBehavior::Stored(2));
        let state = provisioned(&f).await;
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(Some("target/release/hoard"), ArchiveTrigger::Always, false));

        let summary = f
            .handler
            .run(&spec, state, &RunOutcome::Succeeded, &ctx)
            .await;

        assert_eq!(summary.archival, ArchivalStatus::Attempted);
        assert_eq!(summary.artifacts.len(), 2);
        assert!(summary.warnings.is_empty());
        assert_eq!(
            f.store.requests(),
            [("target/release/hoard".to_string(), true)]
        );
        assert_eq!(f.runtime.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_with_success_trigger_skips_archival() {
        let f = fixture(ScriptedRuntime::new(), StoreBehavior::Stored(1));
        let state = provisioned(&f).await;
        let workspace = state.environment().workspace.clone();
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(Some("dist/*"), ArchiveTrigger::OnSuccessOnly, true));

        let summary = f.handler.run(&spec, state, &failed(), &ctx).await;

        assert_eq!(summary.archival, ArchivalStatus::Skipped);
        assert!(f.store.requests().is_empty());
        assert_eq!(f.runtime.teardown_count(), 1);
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_failure_with_always_trigger_archives() {
        let f = fixture(ScriptedRuntime::new(), StoreBehavior::NothingMatched);
        let state = provisioned(&f).await;
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(Some("dist/*"), ArchiveTrigger::Always, false));

        let summary = f.handler.run(&spec, state, &failed(), &ctx).await;

        assert_eq!(summary.archival, ArchivalStatus::Attempted);
        assert_eq!(
            summary.warnings,
            [RunWarning::ArchivalNothingMatched {
                pattern: "dist/*".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_store_error_is_warning() {
        let f = fixture(ScriptedRuntime::new(), StoreBehavior::Fail);
        let state = provisioned(&f).await;
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(Some("dist/*"), ArchiveTrigger::Always, false));

        let summary = f
            .handler
            .run(&spec, state, &RunOutcome::Succeeded, &ctx)
            .await;

        assert!(matches!(
            summary.warnings.as_slice(),
            [RunWarning::ArchivalFailed { .. }]
        ));
        assert_eq!(f.runtime.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_no_pattern_means_not_configured() {
        let f = fixture(ScriptedRuntime::new(), StoreBehavior::Stored(1));
        let state = provisioned(&f).await;
        let workspace = state.environment().workspace.clone();
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(None, ArchiveTrigger::Always, false));

        let summary = f
            .handler
            .run(&spec, state, &RunOutcome::Succeeded, &ctx)
            .await;

        assert_eq!(summary.archival, ArchivalStatus::NotConfigured);
        assert!(f.store.requests().is_empty());
        assert!(workspace.exists());
    }

    #[tokio::test]
    async fn test_teardown_failure_is_warning_and_workspace_still_removed() {
        let f = fixture(ScriptedRuntime::new().fail_teardown(), StoreBehavior::Stored(0));
        let state = provisioned(&f).await;
        let workspace = state.environment().workspace.clone();
        let ctx = RunContext::new(state.run_id, "hoard");
        let spec = spec(post(None, ArchiveTrigger::Always, true));

        let summary = f
            .handler
            .run(&spec, state, &RunOutcome::Succeeded, &ctx)
            .await;

        assert!(matches!(
            summary.warnings.as_slice(),
            [RunWarning::CleanupFailed { .. }]
        ));
        assert_eq!(f.runtime.teardown_count(), 1);
        assert!(!workspace.exists());
    }
}
