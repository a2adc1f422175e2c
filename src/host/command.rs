//! Host command execution.
//!
//! Every mutation of the host (package installs, systemd units, docker) goes
//! through a [`CommandRunner`], so the orchestrator and adapters can be driven
//! against a recording runner in tests.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {}: {stderr}", display_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output: {0}")]
    Parse(String),
}

fn display_status(status: &Option<i32>) -> String {
    status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

impl HostError {
    /// Exit status of the failing command, when there was one.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            HostError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }
}

/// A program invocation on the host.
///
/// Arguments added with [`HostCommand::secret_arg`] are passed through
/// unchanged but never rendered, so the `Display` form is safe to log and
/// to carry in errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    redacted: Vec<usize>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            redacted: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an argument whose value must not appear in logs or errors.
    /// `KEY=value` renders as `KEY=****`, anything else as `****`.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.redacted.push(self.args.len());
        self.arg(arg)
    }

    /// Run `script` through `sh -c`, for pipelines such as repository key imports.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.redacted.contains(&i) {
                match arg.split_once('=') {
                    Some((key, _)) => write!(f, " {key}=****")?,
                    None => write!(f, " ****")?,
                }
            } else if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convert a non-zero exit into [`HostError::CommandFailed`].
    pub fn check(self, command: &HostCommand) -> Result<CommandOutput, HostError> {
        if self.success() {
            Ok(self)
        } else {
            Err(HostError::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is *not* an error here;
    /// callers decide via [`CommandOutput::check`].
    async fn run(&self, command: &HostCommand) -> Result<CommandOutput, HostError>;

    /// Run a command and fail on a non-zero exit.
    async fn run_checked(&self, command: &HostCommand) -> Result<CommandOutput, HostError> {
        self.run(command).await?.check(command)
    }
}

/// Runs commands on the local host with `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &HostCommand) -> Result<CommandOutput, HostError> {
        debug!(command = %command, "Running host command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HostError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            command = %command,
            status = ?result.status,
            stdout_len = result.stdout.len(),
            "Host command finished"
        );

        Ok(result)
    }
}

/// In-memory runner for driving adapters without a real host.
///
/// Public so integration tests and downstream callers can script host
/// behaviour: every command is recorded in its rendered (redacted) form and
/// answered from prefix rules. Commands without a matching rule succeed with
/// empty output. Never touches the host.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    history: Mutex<Vec<HostCommand>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any command whose rendered form starts with `prefix`.
    /// Later rules take precedence over earlier ones.
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        lock(&self.rules).push((prefix.to_string(), output));
    }

    /// Shorthand for a failing response.
    pub fn fail(&self, prefix: &str, status: i32, stderr: &str) {
        self.respond(
            prefix,
            CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Every command run so far, rendered.
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).iter().map(ToString::to_string).collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &HostCommand) -> Result<CommandOutput, HostError> {
        let rendered = command.to_string();
        lock(&self.history).push(command.clone());

        let rules = lock(&self.rules);
        let answer = rules
            .iter()
            .rev()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone());

        Ok(answer.unwrap_or(CommandOutput {
            status: Some(0),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = HostCommand::shell("curl -fsSL https://get.docker.com | sh");
        assert_eq!(
            cmd.to_string(),
            "sh -c 'curl -fsSL https://get.docker.com | sh'"
        );
    }

    #[test]
    fn test_check_maps_nonzero_exit() {
        let cmd = HostCommand::new("docker").arg("pull").arg("ollama/ollama");
        let output = CommandOutput {
            status: Some(125),
            stdout: String::new(),
            stderr: "manifest unknown\n".to_string(),
        };

        let err = output.check(&cmd).unwrap_err();
        assert_eq!(err.exit_status(), Some(125));
        assert!(matches!(
            err,
            HostError::CommandFailed { ref stderr, .. } if stderr == "manifest unknown"
        ));
    }

    #[test]
    fn test_secret_arg_is_redacted() {
        let cmd = HostCommand::new("docker")
            .args(["run", "-e"])
            .secret_arg("POSTGRES_PASSWORD=s3cret")
            .arg("-e")
            .secret_arg("bare-token")
            .arg("postgres:16");

        assert_eq!(cmd.args[2], "POSTGRES_PASSWORD=s3cret");
        assert_eq!(
            cmd.to_string(),
            "docker run -e POSTGRES_PASSWORD=**** -e **** postgres:16"
        );

        let failed = CommandOutput {
            status: Some(125),
            stdout: String::new(),
            stderr: "port is already allocated".to_string(),
        };
        let err = failed.check(&cmd).unwrap_err();
        assert!(!err.to_string().contains("s3cret"));
        assert!(!err.to_string().contains("bare-token"));
    }

    #[tokio::test]
    async fn test_recording_runner_latest_rule_wins() {
        let runner = RecordingRunner::new();
        runner.fail("docker network", 1, "boom");
        runner.respond(
            "docker network inspect",
            CommandOutput {
                status: Some(0),
                stdout: "[]".to_string(),
                stderr: String::new(),
            },
        );

        let inspect = HostCommand::new("docker").args(["network", "inspect", "hr_network"]);
        let create = HostCommand::new("docker").args(["network", "create", "hr_network"]);
        assert!(runner.run(&inspect).await.unwrap().success());
        assert!(!runner.run(&create).await.unwrap().success());
        assert_eq!(runner.history().len(), 2);
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner;
        let out = runner
            .run(&HostCommand::shell("echo hello; echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let runner = SystemRunner;
        let err = runner
            .run(&HostCommand::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Spawn { .. }));
    }
}
