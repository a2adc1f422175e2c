//! [`ContainerRuntime`] over the `docker` CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::host::command::{CommandOutput, CommandRunner, HostCommand, HostError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState};

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
}

/// Parse `docker container inspect` output into a state.
fn parse_inspect(stdout: &str) -> Result<Option<ContainerState>, HostError> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).map_err(|e| HostError::Parse(e.to_string()))?;

    Ok(entries.first().map(|entry| {
        if entry.state.running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }
    }))
}

fn is_missing(output: &CommandOutput) -> bool {
    output.stderr.contains("No such") || output.stderr.contains("not found")
}

/// Docker CLI runtime.
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
        }
    }

    fn command(&self) -> HostCommand {
        HostCommand::new(&self.binary)
    }

    /// Build the `docker run` invocation for a spec.
    pub fn run_command(&self, spec: &ContainerSpec) -> HostCommand {
        let mut cmd = self.command().args(["run", "-d", "--name", spec.name.as_str()]);

        if let Some(gpus) = &spec.gpus {
            cmd = cmd.args(["--gpus", gpus.as_str()]);
        }
        if let Some(network) = &spec.network {
            cmd = cmd.args(["--network", network.as_str()]);
        }
        if let Some(restart) = &spec.restart {
            cmd = cmd.args(["--restart", restart.as_str()]);
        }
        for port in &spec.ports {
            cmd = cmd.arg("-p").arg(port.to_string());
        }
        for mount in &spec.volumes {
            cmd = cmd.arg("-v").arg(mount.to_string());
        }
        for (key, value) in &spec.env {
            let pair = format!("{key}={value}");
            cmd = if spec.is_secret(key) {
                cmd.arg("-e").secret_arg(pair)
            } else {
                cmd.arg("-e").arg(pair)
            };
        }

        cmd.arg(&spec.image)
    }

    /// Inspect a named object; `Ok(false)` when docker reports it missing.
    async fn object_exists(&self, kind: &str, name: &str) -> Result<bool, HostError> {
        let inspect = self.command().args([kind, "inspect", name]);
        let out = self.runner.run(&inspect).await?;
        if out.success() {
            Ok(true)
        } else if is_missing(&out) {
            Ok(false)
        } else {
            out.check(&inspect).map(|_| false)
        }
    }

    /// Create a named object, treating "already exists" as success.
    async fn create_object(&self, kind: &str, name: &str) -> Result<bool, HostError> {
        if self.object_exists(kind, name).await? {
            debug!(kind, name, "Already exists");
            return Ok(false);
        }

        let create = self.command().args([kind, "create", name]);
        let out = self.runner.run(&create).await?;
        if out.success() {
            Ok(true)
        } else if out.stderr.contains("already exists") {
            Ok(false)
        } else {
            out.check(&create).map(|_| false)
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn container_state(&self, name: &str) -> Result<Option<ContainerState>, HostError> {
        let inspect = self.command().args(["container", "inspect", name]);
        let out = self.runner.run(&inspect).await?;

        if out.success() {
            parse_inspect(&out.stdout)
        } else if is_missing(&out) {
            Ok(None)
        } else {
            out.check(&inspect).map(|_| None)
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), HostError> {
        self.runner
            .run_checked(&self.command().args(["rm", "-f", name]))
            .await
            .map(|_| ())
    }

    async fn pull_image(&self, image: &str) -> Result<(), HostError> {
        self.runner
            .run_checked(&self.command().args(["pull", image]))
            .await
            .map(|_| ())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, HostError> {
        let out = self.runner.run_checked(&self.run_command(spec)).await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn exec(&self, container: &str, command: &[&str]) -> Result<CommandOutput, HostError> {
        let cmd = self
            .command()
            .args(["exec", container])
            .args(command.iter().copied());
        self.runner.run_checked(&cmd).await
    }

    async fn ensure_network(&self, name: &str) -> Result<bool, HostError> {
        self.create_object("network", name).await
    }

    async fn ensure_volume(&self, name: &str) -> Result<bool, HostError> {
        self.create_object("volume", name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::command::RecordingRunner;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_run_command_shape() {
        let docker = DockerCli::new(Arc::new(RecordingRunner::new()));
        let spec = ContainerSpec::new("ollama", "ollama/ollama:latest")
            .gpus("all")
            .volume("ollama", "/root/.ollama")
            .port(11434, 11434);

        assert_eq!(
            docker.run_command(&spec).to_string(),
            "docker run -d --name ollama --gpus all -p 11434:11434 -v ollama:/root/.ollama ollama/ollama:latest"
        );
    }

    #[test]
    fn test_run_command_env_and_network() {
        let docker = DockerCli::new(Arc::new(RecordingRunner::new()));
        let spec = ContainerSpec::new("hr_postgres", "postgres:16")
            .network("hr_network")
            .restart("unless-stopped")
            .env("POSTGRES_USER", "hr_user")
            .port(5433, 5432);

        let cmd = docker.run_command(&spec);
        assert_eq!(
            cmd.args,
            vec![
                "run", "-d", "--name", "hr_postgres", "--network", "hr_network", "--restart",
                "unless-stopped", "-p", "5433:5432", "-e", "POSTGRES_USER=hr_user", "postgres:16"
            ]
        );
    }

    #[test]
    fn test_run_command_redacts_secret_env() {
        let docker = DockerCli::new(Arc::new(RecordingRunner::new()));
        let spec = ContainerSpec::new("hr_postgres", "postgres:16")
            .env("POSTGRES_USER", "hr_user")
            .secret_env("POSTGRES_PASSWORD", "hunter2");

        let cmd = docker.run_command(&spec);
        assert!(cmd.args.contains(&"POSTGRES_PASSWORD=hunter2".to_string()));
        assert_eq!(
            cmd.to_string(),
            "docker run -d --name hr_postgres -e POSTGRES_USER=hr_user -e POSTGRES_PASSWORD=**** postgres:16"
        );
    }

    #[tokio::test]
    async fn test_container_state_running_and_missing() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("docker container inspect", 1, "Error: No such container: ghost");
        runner.respond(
            "docker container inspect ollama",
            ok(r#"[{"Id":"abc","State":{"Status":"running","Running":true}}]"#),
        );
        runner.respond(
            "docker container inspect old",
            ok(r#"[{"Id":"def","State":{"Status":"exited","Running":false}}]"#),
        );
        let docker = DockerCli::new(runner);

        assert_eq!(
            docker.container_state("ollama").await.unwrap(),
            Some(ContainerState::Running)
        );
        assert_eq!(
            docker.container_state("old").await.unwrap(),
            Some(ContainerState::Stopped)
        );
        assert_eq!(docker.container_state("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_container_state_daemon_down_is_error() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail(
            "docker container inspect",
            1,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        let docker = DockerCli::new(runner);
        assert!(docker.container_state("ollama").await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_network_existing_is_noop() {
        let runner = Arc::new(RecordingRunner::new());
        let docker = DockerCli::new(runner.clone());

        assert!(!docker.ensure_network("hr_network").await.unwrap());
        assert_eq!(runner.history(), vec!["docker network inspect hr_network"]);
    }

    #[tokio::test]
    async fn test_ensure_network_tolerates_create_race() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("docker network inspect", 1, "Error: No such network: hr_network");
        runner.fail(
            "docker network create",
            1,
            "Error response from daemon: network with name hr_network already exists",
        );
        let docker = DockerCli::new(runner);

        assert!(!docker.ensure_network("hr_network").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_volume_creates_missing() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("docker volume inspect", 1, "Error: No such volume: ollama");
        let docker = DockerCli::new(runner.clone());

        assert!(docker.ensure_volume("ollama").await.unwrap());
        assert_eq!(
            runner.history(),
            vec!["docker volume inspect ollama", "docker volume create ollama"]
        );
    }

    #[tokio::test]
    async fn test_exec_model_pull() {
        let runner = Arc::new(RecordingRunner::new());
        let docker = DockerCli::new(runner.clone());

        docker
            .exec("ollama", &["ollama", "pull", "mistral:7b-instruct"])
            .await
            .unwrap();
        assert_eq!(
            runner.history(),
            vec!["docker exec ollama ollama pull mistral:7b-instruct"]
        );
    }
}
