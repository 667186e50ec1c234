//! External command execution (dependency install, catalog build).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyship_core::{PipelineError, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Human-readable name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds; zero waits forever.
    pub timeout_secs: u64,

    /// Working directory, when not the current one.
    pub cwd: Option<PathBuf>,

    /// File receiving the combined stdout and stderr.
    pub log_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            cwd: None,
            log_file: None,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Command name.
    pub name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl CommandResult {
    /// Whether this command passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last line of stderr, or of stdout when stderr is empty.
    pub fn summary(&self) -> String {
        let output = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let last = output.lines().rev().find(|l| !l.trim().is_empty());
        match last {
            Some(line) => format!(
                "{} exited with code {}: {}",
                self.name,
                self.exit_code,
                line.trim()
            ),
            None => format!("{} exited with code {}", self.name, self.exit_code),
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion. Failing to spawn or timing out is an error; a
    /// non-zero exit is reported through [`CommandResult::passed`].
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandResult>;
}

/// Executor spawning real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let start = Instant::now();

        let Some((exe, args)) = spec.command.split_first() else {
            return Err(PipelineError::Command(format!(
                "{} has an empty command",
                spec.name
            )));
        };

        info!(command = %spec.name, exe = %exe, "running command");
        let mut command = Command::new(exe);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        let child = command.spawn().map_err(|e| {
            PipelineError::Command(format!("{}: cannot spawn {exe}: {e}", spec.name))
        })?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                PipelineError::Command(format!(
                    "{} timed out after {} seconds",
                    spec.name, spec.timeout_secs
                ))
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(log_file) = &spec.log_file {
            tokio::fs::write(log_file, format!("{stdout}{stderr}")).await?;
            debug!(path = %log_file.display(), "wrote command log");
        }

        Ok(CommandResult {
            name: spec.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> CommandResult {
        CommandResult {
            name: "install".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 100,
            success: exit_code == 0,
        }
    }

    #[test]
    fn test_command_result_passed() {
        assert!(result(0, "", "").passed());
        assert!(!result(1, "", "error").passed());
    }

    #[test]
    fn test_summary_prefers_stderr() {
        assert_eq!(
            result(1, "ok\n", "warn\nERR! missing peer\n\n").summary(),
            "install exited with code 1: ERR! missing peer"
        );
        assert_eq!(result(2, "", "").summary(), "install exited with code 2");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new(
            "echo_test",
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );

        let result = ProcessExecutor.execute(&spec).await.expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new("false_test", vec!["false".to_string()], 60);

        let result = ProcessExecutor.execute(&spec).await.expect("execute failed");
        assert!(!result.passed());
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("build-storybook.log");
        let spec = CommandSpec::new(
            "build",
            vec![
                "echo".to_string(),
                "Output directory: /tmp/out".to_string(),
            ],
            60,
        )
        .with_log_file(&log);

        ProcessExecutor.execute(&spec).await.unwrap();
        let written = std::fs::read_to_string(&log).unwrap();
        assert!(written.contains("Output directory: /tmp/out"));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let spec = CommandSpec::new("nothing", Vec::new(), 60);
        let err = ProcessExecutor.execute(&spec).await.unwrap_err();
        assert!(matches!(err, PipelineError::Command(_)));
    }
}
