//! Container runtime access.
//!
//! The provisioner never holds container state itself. It asks the runtime
//! whether a named resource exists, ensures it, or removes it.
//!
//! - [`docker`]: the `docker` CLI implementation

pub mod docker;

use std::fmt;

use async_trait::async_trait;
use crate::host::command::{CommandOutput, HostError};

/// Observed state of a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
}

/// Host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.volume, self.target)
    }
}

/// Everything needed to create one detached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub env: Vec<(String, String)>,
    /// Names of `env` entries whose values are redacted when rendered.
    pub secret_env: Vec<String>,
    pub network: Option<String>,
    /// Value for `--gpus` (e.g. "all"); `None` runs without GPU access.
    pub gpus: Option<String>,
    pub restart: Option<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports: Vec::new(),
            volumes: Vec::new(),
            env: Vec::new(),
            secret_env: Vec::new(),
            network: None,
            gpus: None,
            restart: None,
        }
    }

    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping { host, container });
        self
    }

    pub fn volume(mut self, volume: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            volume: volume.into(),
            target: target.into(),
        });
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Like [`ContainerSpec::env`], but the value never shows up in logs or errors.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.secret_env.push(key.clone());
        self.env(key, value)
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.secret_env.iter().any(|k| k == key)
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn gpus(mut self, gpus: impl Into<String>) -> Self {
        self.gpus = Some(gpus.into());
        self
    }

    pub fn restart(mut self, policy: impl Into<String>) -> Self {
        self.restart = Some(policy.into());
        self
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `None` when no container with this name exists.
    async fn container_state(&self, name: &str) -> Result<Option<ContainerState>, HostError>;

    async fn container_exists(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.container_state(name).await?.is_some())
    }

    /// Force-remove a container, running or not.
    async fn remove_container(&self, name: &str) -> Result<(), HostError>;

    async fn pull_image(&self, image: &str) -> Result<(), HostError>;

    /// Create and start a detached container, returning its id.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, HostError>;

    /// Run a command inside a running container.
    async fn exec(&self, container: &str, command: &[&str]) -> Result<CommandOutput, HostError>;

    /// Create the network unless it exists. Returns `true` if it was created.
    async fn ensure_network(&self, name: &str) -> Result<bool, HostError>;

    /// Create the volume unless it exists. Returns `true` if it was created.
    async fn ensure_volume(&self, name: &str) -> Result<bool, HostError>;
}
