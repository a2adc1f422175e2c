//! Host package installation for the container runtime and the NVIDIA
//! container toolkit.
//!
//! Installs are check-then-install: [`PackageInstaller::is_installed`] probes
//! for the component's binary on `PATH`, and only a missing component is
//! installed. Repository keys and sources are written by the same command
//! lists, so a fresh Ubuntu/Debian host needs nothing beyond `curl`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::host::command::{CommandRunner, HostCommand, HostError};

/// A host-level component managed by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Component {
    /// Docker engine and CLI.
    ContainerRuntime,
    /// NVIDIA container toolkit (`nvidia-ctk`).
    GpuToolkit,
}

impl Component {
    /// Binary whose presence on `PATH` means the component is installed.
    pub fn probe_binary(self) -> &'static str {
        match self {
            Component::ContainerRuntime => "docker",
            Component::GpuToolkit => "nvidia-ctk",
        }
    }

    /// Commands that install the component from scratch.
    pub fn install_commands(self) -> Vec<HostCommand> {
        match self {
            Component::ContainerRuntime => vec![
                apt_get(["update"]),
                apt_get(["install", "-y", "ca-certificates", "curl"]),
                HostCommand::new("install").args(["-m", "0755", "-d", "/etc/apt/keyrings"]),
                HostCommand::new("curl").args([
                    "-fsSL",
                    "https://download.docker.com/linux/ubuntu/gpg",
                    "-o",
                    "/etc/apt/keyrings/docker.asc",
                ]),
                HostCommand::new("chmod").args(["a+r", "/etc/apt/keyrings/docker.asc"]),
                HostCommand::shell(
                    "echo \"deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.asc] \
                     https://download.docker.com/linux/ubuntu $(. /etc/os-release && echo \"$VERSION_CODENAME\") stable\" \
                     > /etc/apt/sources.list.d/docker.list",
                ),
                apt_get(["update"]),
                apt_get([
                    "install",
                    "-y",
                    "docker-ce",
                    "docker-ce-cli",
                    "containerd.io",
                    "docker-buildx-plugin",
                    "docker-compose-plugin",
                ]),
            ],
            Component::GpuToolkit => vec![
                HostCommand::shell(
                    "curl -fsSL https://nvidia.github.io/libnvidia-container/gpgkey \
                     | gpg --dearmor --yes -o /usr/share/keyrings/nvidia-container-toolkit-keyring.gpg",
                ),
                HostCommand::shell(
                    "curl -s -L https://nvidia.github.io/libnvidia-container/stable/deb/nvidia-container-toolkit.list \
                     | sed 's#deb https://#deb [signed-by=/usr/share/keyrings/nvidia-container-toolkit-keyring.gpg] https://#g' \
                     > /etc/apt/sources.list.d/nvidia-container-toolkit.list",
                ),
                apt_get(["update"]),
                apt_get(["install", "-y", "nvidia-container-toolkit"]),
            ],
        }
    }

    /// Commands that (re)configure an installed component. Safe to repeat.
    pub fn configure_commands(self) -> Vec<HostCommand> {
        match self {
            Component::ContainerRuntime => {
                vec![HostCommand::new("systemctl").args(["enable", "--now", "docker"])]
            }
            Component::GpuToolkit => vec![
                HostCommand::new("nvidia-ctk").args(["runtime", "configure", "--runtime=docker"]),
                HostCommand::new("systemctl").args(["restart", "docker"]),
            ],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::ContainerRuntime => write!(f, "container runtime"),
            Component::GpuToolkit => write!(f, "NVIDIA container toolkit"),
        }
    }
}

fn apt_get<const N: usize>(args: [&str; N]) -> HostCommand {
    HostCommand::new("apt-get").args(args)
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn is_installed(&self, component: Component) -> Result<bool, HostError>;

    async fn install(&self, component: Component) -> Result<(), HostError>;

    async fn configure(&self, component: Component) -> Result<(), HostError>;
}

/// apt-based installer for Debian/Ubuntu hosts.
pub struct AptInstaller {
    runner: Arc<dyn CommandRunner>,
}

impl AptInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_all(&self, commands: Vec<HostCommand>) -> Result<(), HostError> {
        for command in &commands {
            self.runner.run_checked(command).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PackageInstaller for AptInstaller {
    async fn is_installed(&self, component: Component) -> Result<bool, HostError> {
        let probe = HostCommand::shell(format!("command -v {}", component.probe_binary()));
        let out = self.runner.run(&probe).await?;
        debug!(%component, found = out.success(), path = out.stdout.trim(), "Probed component");
        Ok(out.success())
    }

    async fn install(&self, component: Component) -> Result<(), HostError> {
        info!(%component, "Installing");
        self.run_all(component.install_commands()).await
    }

    async fn configure(&self, component: Component) -> Result<(), HostError> {
        info!(%component, "Configuring");
        self.run_all(component.configure_commands()).await
    }
}
