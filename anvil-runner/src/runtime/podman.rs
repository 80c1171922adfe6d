//! Podman container runtime
//!
//! Handles the container lifecycle for a run:
//! - Checking podman availability
//! - Starting one container per run with the workspace mounted
//! - Executing stage commands in it
//! - Force-removing it at teardown

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AgentRuntime, ExecOutput, ExecutionEnvironment};

/// Mount point of the run workspace inside the container
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Checks if podman is installed and available
pub async fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// Runtime that isolates each run in its own podman container
#[derive(Debug, Clone)]
pub struct PodmanRuntime {
    binary: String,
}

impl PodmanRuntime {
    pub fn new() -> Self {
        Self {
            binary: "podman".to_string(),
        }
    }

    /// Uses a podman-compatible binary other than `podman`
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Container name for a run
    ///
    /// Unique per run so containers are never shared between runs.
    pub fn container_name(run_id: Uuid) -> String {
        format!("anvil-{}", run_id)
    }

    /// Builds the `podman run` argument list
    fn run_args(
        container_name: &str,
        image: &str,
        extra_args: &[String],
        workspace: &Path,
    ) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            // Override any image entrypoint so the container just idles
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
            "-v".to_string(),
            format!("{}:{}", workspace.display(), CONTAINER_WORKSPACE),
            "-w".to_string(),
            CONTAINER_WORKSPACE.to_string(),
        ];

        // Agent args are written the way they would be on a command line
        for arg in extra_args {
            args.extend(
                split_words(arg).with_context(|| format!("Invalid agent argument `{}`", arg))?,
            );
        }

        args.push(image.to_string());
        args.push("-c".to_string());
        args.push("sleep infinity".to_string());
        Ok(args)
    }
}

/// Splits a command-line fragment into words
///
/// Follows POSIX shell quoting: single quotes are literal, double quotes
/// allow `\"`, `\\`, `\$` and `` \` `` escapes, and a backslash outside quotes
/// escapes the next character. No expansion is performed.
fn split_words(input: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => anyhow::bail!("unterminated single quote"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => anyhow::bail!("unterminated double quote"),
                        },
                        Some(c) => word.push(c),
                        None => anyhow::bail!("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => word.push(c),
                    None => anyhow::bail!("trailing backslash"),
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

impl Default for PodmanRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for PodmanRuntime {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn provision(
        &self,
        run_id: Uuid,
        image: &str,
        args: &[String],
        workspace: &Path,
    ) -> Result<ExecutionEnvironment> {
        let container_name = Self::container_name(run_id);

        info!("Creating container {} for image {}", container_name, image);

        // podman run blocks until the container is running
        let run_args = Self::run_args(&container_name, image, args, workspace)?;
        let output = Command::new(&self.binary)
            .args(run_args)
            .output()
            .await
            .context("Failed to execute podman run command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("podman run stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);

            let error_msg = format!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                image,
                exit_code,
                stderr.trim()
            );

            error!("{}", error_msg);

            // A failed run can leave a created-but-stopped container behind
            let _ = Command::new(&self.binary)
                .args(["rm", "-f", container_name.as_str()])
                .output()
                .await;

            anyhow::bail!("{}", error_msg);
        }

        info!(
            "Container {} started successfully with ID: {}",
            container_name,
            stdout.trim()
        );

        Ok(ExecutionEnvironment {
            run_id,
            handle: container_name,
            image: image.to_string(),
            workspace: workspace.to_path_buf(),
        })
    }

    async fn exec(&self, env: &ExecutionEnvironment, command: &str) -> Result<ExecOutput> {
        debug!("Executing in container {}: {}", env.handle, command);

        let output = Command::new(&self.binary)
            .arg("exec")
            .arg("-w")
            .arg(CONTAINER_WORKSPACE)
            .arg(&env.handle)
            .arg("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute podman exec command")?;

        let exec_output = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        debug!(
            "Command finished in container {}: exit_code={}, stdout_len={}, stderr_len={}",
            env.handle,
            exec_output.exit_code,
            exec_output.stdout.len(),
            exec_output.stderr.len()
        );

        Ok(exec_output)
    }

    async fn teardown(&self, env: &ExecutionEnvironment) -> Result<()> {
        debug!("Removing container {} (image: {})", env.handle, env.image);

        // rm -f stops the container first
        let output = Command::new(&self.binary)
            .args(["rm", "-f", env.handle.as_str()])
            .output()
            .await
            .with_context(|| format!("Failed to execute podman rm for {}", env.handle))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Failed to remove container {}: {}", env.handle, stderr.trim());
            anyhow::bail!(
                "Failed to remove container {}: {}",
                env.handle,
                stderr.trim()
            );
        }

        debug!("Container {} removed", env.handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_args_mount_workspace_and_split_agent_args() {
        let args = PodmanRuntime::run_args(
            "anvil-test",
            "rust:latest",
            &["-v /tmp/cargo:/usr/local/cargo/registry".to_string(), "--network=host".to_string()],
            &PathBuf::from("/var/lib/anvil/run-1"),
        )
        .unwrap();

        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name anvil-test --entrypoint /bin/sh"));
        assert!(joined.contains("-v /var/lib/anvil/run-1:/workspace -w /workspace"));
        assert!(joined.contains("-v /tmp/cargo:/usr/local/cargo/registry --network=host rust:latest"));
        assert_eq!(&args[args.len() - 2..], ["-c", "sleep infinity"]);
    }

    #[test]
    fn test_run_args_keep_quoted_agent_args_together() {
        let args = PodmanRuntime::run_args(
            "anvil-test",
            "rust:latest",
            &[
                r#"-v "/my cache:/cache""#.to_string(),
                "--env 'GREETING=hello world'".to_string(),
            ],
            &PathBuf::from("/var/lib/anvil/run-1"),
        )
        .unwrap();

        let image = args.iter().position(|a| a == "rust:latest").unwrap();
        assert_eq!(
            args[image - 4..image],
            ["-v", "/my cache:/cache", "--env", "GREETING=hello world"]
        );
    }

    #[test]
    fn test_run_args_reject_unbalanced_quotes() {
        let result = PodmanRuntime::run_args(
            "anvil-test",
            "rust:latest",
            &[r#"-v "/my cache:/cache"#.to_string()],
            &PathBuf::from("/var/lib/anvil/run-1"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_split_words() {
        assert_eq!(split_words("  -p 8080:80  ").unwrap(), ["-p", "8080:80"]);
        assert_eq!(split_words(r"-v /a\ b:/c").unwrap(), ["-v", "/a b:/c"]);
        assert_eq!(split_words(r#"--label "x=\"y\"""#).unwrap(), ["--label", r#"x="y""#]);
        assert_eq!(split_words("--env ''").unwrap(), ["--env", ""]);
        assert!(split_words("--env 'open").is_err());
        assert!(split_words("trailing\\").is_err());
    }

    #[test]
    fn test_container_names_are_unique_per_run() {
        let a = PodmanRuntime::container_name(Uuid::new_v4());
        let b = PodmanRuntime::container_name(Uuid::new_v4());
        assert!(a.starts_with("anvil-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_provision_fails_when_binary_missing() {
        let runtime = PodmanRuntime::with_binary("anvil-no-such-podman-binary");
        let result = runtime
            .provision(Uuid::new_v4(), "alpine", &[], Path::new("/tmp"))
            .await;
        assert!(result.is_err());
    }
}
