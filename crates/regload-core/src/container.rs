//! Container tool invocation.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::error::ContainerError;

/// Captured result of one container tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Invocation of the container CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerCommand {
    pub args: Vec<String>,
    /// Directory injected as `DOCKER_CONFIG`, if any.
    pub config_dir: Option<PathBuf>,
}

impl ContainerCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            config_dir: None,
        }
    }

    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    /// First argument, e.g. `pull`.
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// The external container tool.
#[async_trait]
pub trait ContainerTool: Send + Sync {
    /// Run one command to completion. Non-zero exits are returned in the
    /// output, not as errors.
    async fn run(&self, command: &ContainerCommand) -> Result<CommandOutput, ContainerError>;
}

/// `docker` (or a compatible CLI) driven through `tokio::process`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    executable: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(executable: &str, timeout_secs: u64) -> Self {
        Self {
            executable: executable.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", 300)
    }
}

#[async_trait]
impl ContainerTool for DockerCli {
    async fn run(&self, command: &ContainerCommand) -> Result<CommandOutput, ContainerError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.executable);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.config_dir {
            cmd.env("DOCKER_CONFIG", dir);
        }

        let child = cmd.spawn().map_err(|e| ContainerError::Spawn {
            tool: self.executable.clone(),
            reason: e.to_string(),
        })?;

        let output = if self.timeout.is_zero() {
            child.wait_with_output().await?
        } else {
            tokio::time::timeout(self.timeout, child.wait_with_output())
                .await
                .map_err(|_| ContainerError::Timeout {
                    tool: self.executable.clone(),
                    subcommand: command.subcommand().to_string(),
                    secs: self.timeout.as_secs(),
                })??
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            tool = %self.executable,
            subcommand = command.subcommand(),
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Container command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_subcommand() {
        let cmd = ContainerCommand::new(["pull", "hello-world:latest"]);
        assert_eq!(cmd.subcommand(), "pull");
        assert_eq!(ContainerCommand::new(Vec::<String>::new()).subcommand(), "");
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let tool = DockerCli::new("echo", 60);
        let output = tool
            .run(&ContainerCommand::new(["hello"]))
            .await
            .expect("echo should run");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let tool = DockerCli::new("false", 60);
        let output = tool.run(&ContainerCommand::new(["info"])).await.unwrap();
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let tool = DockerCli::new("regload-no-such-binary", 60);
        let err = tool.run(&ContainerCommand::new(["info"])).await.unwrap_err();
        assert!(matches!(err, ContainerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let tool = DockerCli::new("sleep", 1);
        let err = tool.run(&ContainerCommand::new(["5"])).await.unwrap_err();
        assert!(matches!(err, ContainerError::Timeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_config_dir_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DockerCli::new("sh", 60);
        let cmd = ContainerCommand::new(["-c", "printf %s \"$DOCKER_CONFIG\""])
            .with_config_dir(dir.path().to_path_buf());
        let output = tool.run(&cmd).await.unwrap();
        assert_eq!(output.stdout, dir.path().display().to_string());
    }
}
