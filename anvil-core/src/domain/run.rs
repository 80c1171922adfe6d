//! Run domain types
//!
//! These describe a single execution of a pipeline: its status while it is
//! running, the final outcome, and the report handed back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::log::LogEntry;

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailureCause {
    /// The command ran and exited non-zero
    CommandFailed { command: String, exit_code: i32 },
    /// The runtime could not execute the command at all
    ExecError { command: String, message: String },
    /// The run timeout expired; `command` is the one that was killed, if any
    TimedOut { command: Option<String> },
    /// The run was cancelled; `command` is the one that was killed, if any
    Cancelled { command: Option<String> },
}

impl std::fmt::Display for StageFailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandFailed { command, exit_code } => {
                write!(f, "command `{}` exited with code {}", command, exit_code)
            }
            Self::ExecError { command, message } => {
                write!(f, "command `{}` could not be executed: {}", command, message)
            }
            Self::TimedOut {
                command: Some(command),
            } => write!(f, "run timed out during `{}`", command),
            Self::TimedOut { command: None } => write!(f, "run timed out before stage start"),
            Self::Cancelled {
                command: Some(command),
            } => write!(f, "run cancelled during `{}`", command),
            Self::Cancelled { command: None } => write!(f, "run cancelled before stage start"),
        }
    }
}

/// Run status state machine
///
/// `Pending → Running(stage) → Succeeded | Failed(stage, cause)`.
/// Stage numbers are 1-based positions in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running {
        stage: usize,
    },
    Succeeded,
    Failed {
        stage: usize,
        stage_name: String,
        cause: StageFailureCause,
    },
}

impl RunStatus {
    /// Final outcome, if the run reached a terminal state
    pub fn outcome(&self) -> Option<RunOutcome> {
        match self {
            RunStatus::Pending | RunStatus::Running { .. } => None,
            RunStatus::Succeeded => Some(RunOutcome::Succeeded),
            RunStatus::Failed {
                stage,
                stage_name,
                cause,
            } => Some(RunOutcome::Failed {
                stage: *stage,
                stage_name: stage_name.clone(),
                cause: cause.clone(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed {
        stage: usize,
        stage_name: String,
        cause: StageFailureCause,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Failed {
                stage,
                stage_name,
                cause,
            } => RunStatus::Failed {
                stage,
                stage_name,
                cause,
            },
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "Succeeded"),
            RunOutcome::Failed {
                stage,
                stage_name,
                cause,
            } => write!(f, "Failed at stage {} ({}): {}", stage, stage_name, cause),
        }
    }
}

/// Non-fatal problems recorded during post-run handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The artifact glob matched no files
    ArchivalNothingMatched { pattern: String },
    /// Archival was attempted but the store reported an error
    ArchivalFailed { pattern: String, message: String },
    /// Teardown or workspace removal failed
    CleanupFailed { message: String },
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArchivalNothingMatched { pattern } => {
                write!(f, "no artifacts matched '{}'", pattern)
            }
            Self::ArchivalFailed { pattern, message } => {
                write!(f, "archiving '{}' failed: {}", pattern, message)
            }
            Self::CleanupFailed { message } => write!(f, "cleanup failed: {}", message),
        }
    }
}

/// What the post-run handler did about artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalStatus {
    /// The pipeline declares no artifact pattern
    NotConfigured,
    /// The trigger policy excluded this outcome
    Skipped,
    /// The store was invoked (see warnings for soft failures)
    Attempted,
}

/// A file copied into the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedArtifact {
    /// Path relative to the run workspace
    pub path: String,
    /// Location inside the archive directory
    pub stored_at: PathBuf,
    pub size: u64,
    /// Hex SHA-256, present when fingerprinting is enabled
    pub sha256: Option<String>,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub archival: ArchivalStatus,
    pub artifacts: Vec<ArchivedArtifact>,
    pub warnings: Vec<RunWarning>,
    pub logs: Vec<LogEntry>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_outcome() {
        assert_eq!(RunStatus::Pending.outcome(), None);
        assert_eq!(RunStatus::Running { stage: 2 }.outcome(), None);
        assert_eq!(RunStatus::Succeeded.outcome(), Some(RunOutcome::Succeeded));

        let failed = RunStatus::Failed {
            stage: 1,
            stage_name: "build".to_string(),
            cause: StageFailureCause::CommandFailed {
                command: "make".to_string(),
                exit_code: 2,
            },
        };
        assert!(failed.is_terminal());
        assert!(!failed.outcome().unwrap().is_success());
    }

    #[test]
    fn test_outcome_display() {
        let outcome = RunOutcome::Failed {
            stage: 2,
            stage_name: "test".to_string(),
            cause: StageFailureCause::CommandFailed {
                command: "cargo test".to_string(),
                exit_code: 101,
            },
        };
        assert_eq!(
            outcome.to_string(),
            "Failed at stage 2 (test): command `cargo test` exited with code 101"
        );
        assert_eq!(RunOutcome::Succeeded.to_string(), "Succeeded");

        let cause = StageFailureCause::Cancelled {
            command: Some("cargo build".to_string()),
        };
        assert_eq!(cause.to_string(), "run cancelled during `cargo build`");
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RunOutcome::Failed {
            stage: 1,
            stage_name: "build".to_string(),
            cause: StageFailureCause::TimedOut { command: None },
        })
        .unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], 1);
        assert_eq!(json["cause"]["kind"], "timed_out");
    }
}
