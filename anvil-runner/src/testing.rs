//! Test doubles for the runtime and artifact store boundaries

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::artifacts::{ArchiveRequest, ArtifactStore, StoreOutcome};
use crate::runtime::{AgentRuntime, ExecOutput, ExecutionEnvironment};

/// Runtime whose command results are scripted up front
///
/// Commands succeed with exit code 0 unless configured otherwise.
#[derive(Default)]
pub struct ScriptedRuntime {
    fail_provision: bool,
    fail_teardown: bool,
    exit_codes: HashMap<String, i32>,
    exec_errors: Vec<String>,
    delays: HashMap<String, Duration>,
    creates: HashMap<String, String>,
    executed: Mutex<Vec<String>>,
    provisioned: Mutex<Vec<Uuid>>,
    torn_down: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_provision(mut self) -> Self {
        self.fail_provision = true;
        self
    }

    pub fn fail_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// `command` exits with `code`
    pub fn exit_code(mut self, command: &str, code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), code);
        self
    }

    /// `command` cannot be executed at all
    pub fn exec_error(mut self, command: &str) -> Self {
        self.exec_errors.push(command.to_string());
        self
    }

    /// `command` takes `delay` to complete
    pub fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    /// `command` writes a file at `path` (relative to the workspace)
    pub fn creates(mut self, command: &str, path: &str) -> Self {
        self.creates.insert(command.to_string(), path.to_string());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn provision_count(&self) -> usize {
        self.provisioned.lock().unwrap().len()
    }

    pub fn teardown_count(&self) -> usize {
        self.torn_down.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn provision(
        &self,
        run_id: Uuid,
        image: &str,
        _args: &[String],
        workspace: &Path,
    ) -> Result<ExecutionEnvironment> {
        if self.fail_provision {
            anyhow::bail!("image {} not found", image);
        }
        self.provisioned.lock().unwrap().push(run_id);
        Ok(ExecutionEnvironment {
            run_id,
            handle: format!("scripted-{}", run_id),
            image: image.to_string(),
            workspace: workspace.to_path_buf(),
        })
    }

    async fn exec(&self, env: &ExecutionEnvironment, command: &str) -> Result<ExecOutput> {
        self.executed.lock().unwrap().push(command.to_string());

        if let Some(delay) = self.delays.get(command) {
            tokio::time::sleep(*delay).await;
        }
        if self.exec_errors.iter().any(|c| c == command) {
            anyhow::bail!("exec failed for `{}`", command);
        }
        if let Some(path) = self.creates.get(command) {
            let full = env.workspace.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, command)?;
        }

        Ok(ExecOutput {
            exit_code: self.exit_codes.get(command).copied().unwrap_or(0),
            stdout: format!("ran {}\n", command),
            stderr: String::new(),
        })
    }

    async fn teardown(&self, env: &ExecutionEnvironment) -> Result<()> {
        self.torn_down.lock().unwrap().push(env.handle.clone());
        if self.fail_teardown {
            anyhow::bail!("container {} is stuck", env.handle);
        }
        Ok(())
    }
}

/// What a [`RecordingStore`] returns
#[derive(Debug, Clone)]
pub enum StoreBehavior {
    NothingMatched,
    Fail,
    Stored(usize),
}

/// Artifact store that records requests instead of copying files
pub struct RecordingStore {
    behavior: StoreBehavior,
    requests: Mutex<Vec<(String, bool)>>,
}

impl RecordingStore {
    pub fn new(behavior: StoreBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `(pattern, fingerprint)` pairs
    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn store(&self, request: &ArchiveRequest) -> Result<StoreOutcome> {
        self.requests
            .lock()
            .unwrap()
            .push((request.pattern.clone(), request.fingerprint));

        match self.behavior {
            StoreBehavior::NothingMatched => Ok(StoreOutcome::NothingMatched),
            StoreBehavior::Fail => anyhow::bail!("archive volume is read-only"),
            StoreBehavior::Stored(count) => Ok(StoreOutcome::Stored(
                (0..count)
                    .map(|i| anvil_core::domain::run::ArchivedArtifact {
                        path: format!("artifact-{}", i),
                        stored_at: std::path::PathBuf::from(format!("/archive/artifact-{}", i)),
                        size: 0,
                        sha256: request.fingerprint.then(|| "0".repeat(64)),
                    })
                    .collect(),
            )),
        }
    }
}
