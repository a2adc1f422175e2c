//! Drive the real systemd/apt/docker adapters over a recording runner and
//! check the host commands the plan issues.

use std::sync::Arc;

use async_trait::async_trait;

use llm_host_setup::config::Config;
use llm_host_setup::host::command::{CommandOutput, CommandRunner, RecordingRunner};
use llm_host_setup::host::packages::AptInstaller;
use llm_host_setup::host::systemd::SystemdServices;
use llm_host_setup::provision::{Adapters, ProvisionError, Provisioner, ReadinessProbe};
use llm_host_setup::runtime::docker::DockerCli;

struct AlwaysReady;

#[async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn is_ready(&self, _endpoint: &str) -> bool {
        true
    }
}

/// A host with docker and the toolkit installed, no containers, and an
/// existing `hr_network`.
fn provisioned_host() -> Arc<RecordingRunner> {
    let runner = Arc::new(RecordingRunner::new());
    runner.fail("docker container inspect", 1, "Error: No such container");
    runner.fail("docker volume inspect", 1, "Error: No such volume");
    runner.respond(
        "docker run",
        CommandOutput {
            status: Some(0),
            stdout: "3f1c9a7e2b4d\n".to_string(),
            stderr: String::new(),
        },
    );
    runner
}

fn provisioner(runner: Arc<RecordingRunner>) -> Provisioner {
    let commands: Arc<dyn CommandRunner> = runner;
    let adapters = Adapters {
        services: Arc::new(SystemdServices::new(commands.clone())),
        packages: Arc::new(AptInstaller::new(commands.clone())),
        runtime: Arc::new(DockerCli::new(commands.clone())),
        probe: Arc::new(AlwaysReady),
        commands,
    };
    Provisioner::new(Arc::new(Config::default()), adapters)
}

fn position(history: &[String], prefix: &str) -> usize {
    history
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("`{prefix}` was never run"))
}

#[tokio::test]
async fn test_command_order() {
    let runner = provisioned_host();
    provisioner(runner.clone()).provision().await.unwrap();
    let history = runner.history();

    let ordered = [
        "systemctl stop ollama",
        "systemctl disable ollama",
        "docker container inspect ollama",
        "sh -c 'command -v docker'",
        "sh -c 'command -v nvidia-ctk'",
        "nvidia-ctk runtime configure --runtime=docker",
        "systemctl restart docker",
        "docker pull ollama/ollama:latest",
        "docker volume create ollama",
        "docker run -d --name ollama --gpus all",
        "docker exec ollama ollama pull mistral:7b-instruct",
        "docker network inspect hr_network",
        "docker volume create hr_pgdata",
        "docker run -d --name hr_postgres",
        "docker run -d --name hr_adminer",
    ];
    let positions: Vec<usize> = ordered.iter().map(|p| position(&history, p)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "commands out of order: {history:#?}"
    );

    // Already installed: nothing reaches apt.
    assert!(!history.iter().any(|c| c.starts_with("apt-get")));
    // Network already existed.
    assert!(!history.iter().any(|c| c.starts_with("docker network create")));
}

#[tokio::test]
async fn test_database_run_arguments() {
    let runner = provisioned_host();
    provisioner(runner.clone()).provision().await.unwrap();
    let history = runner.history();

    let run = &history[position(&history, "docker run -d --name hr_postgres")];
    assert!(run.contains("--network hr_network"));
    assert!(run.contains("-p 5433:5432"));
    assert!(run.contains("-e POSTGRES_USER=hr_user"));
    assert!(run.contains("-e POSTGRES_DB=hr_db"));
    assert!(run.contains("-v hr_pgdata:/var/lib/postgresql/data"));
    assert!(run.ends_with("postgres:16"));

    let admin = &history[position(&history, "docker run -d --name hr_adminer")];
    assert!(admin.contains("-p 8081:8080"));
    assert!(admin.contains("-e ADMINER_DEFAULT_SERVER=hr_postgres"));
}

#[tokio::test]
async fn test_missing_docker_is_installed_then_enabled() {
    let runner = provisioned_host();
    runner.fail("sh -c 'command -v docker'", 1, "");
    provisioner(runner.clone()).provision().await.unwrap();
    let history = runner.history();

    let install = position(&history, "apt-get install -y docker-ce");
    let enable = position(&history, "systemctl enable --now docker");
    let pull = position(&history, "docker pull");
    assert!(install < enable && enable < pull);
}

#[tokio::test]
async fn test_image_pull_failure_is_fetch_error() {
    let runner = provisioned_host();
    runner.fail(
        "docker pull",
        1,
        "Error response from daemon: Get \"https://registry-1.docker.io/v2/\": dial tcp: lookup registry-1.docker.io: no such host",
    );

    let err = provisioner(runner.clone()).provision().await.unwrap_err();

    assert!(matches!(err, ProvisionError::Fetch { .. }));
    assert!(err.to_string().contains("no such host"));
    assert!(!runner.history().iter().any(|c| c.starts_with("docker run")));
}

#[tokio::test]
async fn test_gpu_configure_failure_aborts_with_its_status() {
    let runner = provisioned_host();
    runner.fail("nvidia-ctk runtime configure", 3, "unable to update config");

    let err = provisioner(runner.clone()).provision().await.unwrap_err();

    assert!(matches!(err, ProvisionError::Install { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(!runner.history().iter().any(|c| c.starts_with("docker pull")));
}

#[tokio::test]
async fn test_database_launch_failure_stops_before_admin_ui() {
    let runner = provisioned_host();
    runner.fail(
        "docker run -d --name hr_postgres",
        125,
        "Bind for 0.0.0.0:5433 failed: port is already allocated",
    );

    let err = provisioner(runner.clone()).provision().await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Launch { ref container, .. } if container == "hr_postgres"
    ));
    assert_eq!(err.exit_code(), 125);
    assert!(err.to_string().contains("port is already allocated"));
    assert!(!err.to_string().contains("hr_password"));
    assert!(err.to_string().contains("POSTGRES_PASSWORD=****"));

    let history = runner.history();
    assert!(!history.iter().any(|c| c.starts_with("docker run -d --name hr_adminer")));
    assert!(!history.iter().any(|c| c.contains("hr_password")));
}

#[tokio::test]
async fn test_serving_launch_failure_skips_model_pull() {
    let runner = provisioned_host();
    runner.fail(
        "docker run -d --name ollama",
        125,
        "could not select device driver \"\" with capabilities: [[gpu]]",
    );

    let err = provisioner(runner.clone()).provision().await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Launch { ref container, .. } if container == "ollama"
    ));
    assert_eq!(err.exit_code(), 125);

    let history = runner.history();
    assert!(!history.iter().any(|c| c.starts_with("docker exec")));
    assert!(!history.iter().any(|c| c.starts_with("docker network")));
}
