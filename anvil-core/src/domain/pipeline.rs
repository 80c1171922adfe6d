//! Pipeline domain types
//!
//! A loaded pipeline is an immutable tree: one agent, an ordered list of
//! stages, and the post-run actions. Nothing here is mutated after load.

use serde::{Deserialize, Serialize};

/// Pipeline definition
///
/// Produced by the definition loader and consumed by a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline identity, also the concurrency gate key
    pub name: String,
    pub agent: AgentSpec,
    pub options: PipelineOptions,
    /// Stages in declaration order
    pub stages: Vec<StageSpec>,
    pub post: PostActionSpec,
}

impl PipelineSpec {
    /// Total number of commands across all stages
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }
}

/// Execution environment requested by a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Container image (e.g., docker.io/rust:1.85)
    pub image: String,
    /// Extra runtime arguments such as `-v /cache:/cache`
    ///
    /// Each entry is split with shell quoting rules, so a path with spaces
    /// is written as `-v "/my cache:/cache"`.
    pub args: Vec<String>,
}

/// Pipeline-level options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// When set, at most one run of this pipeline is active at a time
    pub disable_concurrent_builds: bool,
    /// Overrides the runner's default run timeout
    pub timeout_seconds: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            disable_concurrent_builds: true,
            timeout_seconds: None,
        }
    }
}

/// A named group of shell commands executed in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub steps: Vec<String>,
}

/// When artifacts are archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveTrigger {
    /// Archive only when every stage succeeded
    OnSuccessOnly,
    /// Archive whatever is present, even after a failure
    Always,
}

impl ArchiveTrigger {
    /// Parses the value used in pipeline definitions (`success` | `always`)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::OnSuccessOnly),
            "always" => Some(Self::Always),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnSuccessOnly => "success",
            Self::Always => "always",
        }
    }
}

impl std::fmt::Display for ArchiveTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Post-run bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostActionSpec {
    /// Glob pattern relative to the run workspace
    pub artifacts: Option<String>,
    /// Record a SHA-256 for every archived file
    pub fingerprint: bool,
    pub trigger: ArchiveTrigger,
    /// Remove the run workspace after teardown
    pub cleanup_workspace: bool,
}

impl Default for PostActionSpec {
    fn default() -> Self {
        Self {
            artifacts: None,
            fingerprint: false,
            trigger: ArchiveTrigger::Always,
            cleanup_workspace: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_trigger_parse() {
        assert_eq!(
            ArchiveTrigger::parse("success"),
            Some(ArchiveTrigger::OnSuccessOnly)
        );
        assert_eq!(ArchiveTrigger::parse("always"), Some(ArchiveTrigger::Always));
        assert_eq!(ArchiveTrigger::parse("onlyIfSuccessful"), None);
        assert_eq!(ArchiveTrigger::OnSuccessOnly.to_string(), "success");
    }

    #[test]
    fn test_pipeline_lookups() {
        let spec = PipelineSpec {
            name: "hoard".to_string(),
            agent: AgentSpec {
                image: "rust:latest".to_string(),
                args: vec![],
            },
            options: PipelineOptions::default(),
            stages: vec![
                StageSpec {
                    name: "build".to_string(),
                    steps: vec!["cargo build".to_string(), "ls target".to_string()],
                },
                StageSpec {
                    name: "test".to_string(),
                    steps: vec!["cargo test".to_string()],
                },
            ],
            post: PostActionSpec::default(),
        };

        assert_eq!(spec.step_count(), 3);
        assert!(spec.options.disable_concurrent_builds);
    }
}
