//! Provisioning orchestrator.
//!
//! Runs [`Step::PLAN`] strictly in order against the host adapters. A fatal
//! step aborts the run immediately with no rollback; best-effort steps have
//! their errors logged and discarded.
//!
//! - [`plan`]: step definitions and outcomes
//! - [`readiness`]: waiting for the serving container

pub mod plan;
pub mod readiness;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::host::command::{CommandRunner, HostError, SystemRunner};
use crate::host::gpu::detect_devices;
use crate::host::packages::{AptInstaller, Component, PackageInstaller};
use crate::host::systemd::{ServiceControl, SystemdServices};
use crate::report::Report;
use crate::runtime::docker::DockerCli;
use crate::runtime::{ContainerRuntime, ContainerSpec};

pub use plan::{Step, StepOutcome, StepRecord};
pub use readiness::{HttpProbe, ReadinessProbe};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Install of {component} failed: {source}")]
    Install {
        component: Component,
        #[source]
        source: HostError,
    },

    #[error("Pull of image {image} failed: {source}")]
    Fetch {
        image: String,
        #[source]
        source: HostError,
    },

    #[error("Launch of container {container} failed: {source}")]
    Launch {
        container: String,
        #[source]
        source: HostError,
    },

    #[error("Pull of model {model} failed: {source}")]
    ModelFetch {
        model: String,
        #[source]
        source: HostError,
    },

    #[error("{endpoint} not ready after {attempts} attempts")]
    ReadinessTimeout { endpoint: String, attempts: u32 },

    /// Failure of a best-effort step. Never aborts a run.
    #[error("{step} failed: {source}")]
    Host {
        step: Step,
        #[source]
        source: HostError,
    },
}

impl ProvisionError {
    fn host_error(&self) -> Option<&HostError> {
        match self {
            ProvisionError::Install { source, .. }
            | ProvisionError::Fetch { source, .. }
            | ProvisionError::Launch { source, .. }
            | ProvisionError::ModelFetch { source, .. }
            | ProvisionError::Host { source, .. } => Some(source),
            ProvisionError::ReadinessTimeout { .. } => None,
        }
    }

    /// Process exit code: the failing command's status when it had a
    /// non-zero one, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        self.host_error()
            .and_then(HostError::exit_status)
            .filter(|status| *status != 0)
            .unwrap_or(1)
    }
}

/// The provisioner's view of the host.
#[derive(Clone)]
pub struct Adapters {
    pub commands: Arc<dyn CommandRunner>,
    pub services: Arc<dyn ServiceControl>,
    pub packages: Arc<dyn PackageInstaller>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn ReadinessProbe>,
}

impl Adapters {
    /// Adapters that act on the local host.
    pub fn system(config: &Config) -> Result<Self, reqwest::Error> {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let probe = HttpProbe::new(Duration::from_millis(config.readiness.probe_timeout_ms))?;

        Ok(Self {
            services: Arc::new(SystemdServices::new(commands.clone())),
            packages: Arc::new(AptInstaller::new(commands.clone())),
            runtime: Arc::new(DockerCli::new(commands.clone())),
            probe: Arc::new(probe),
            commands,
        })
    }
}

/// Runs the provisioning plan for one configuration.
pub struct Provisioner {
    config: Arc<Config>,
    adapters: Adapters,
}

impl Provisioner {
    pub fn new(config: Arc<Config>, adapters: Adapters) -> Self {
        Self { config, adapters }
    }

    /// Run every step of the plan and report the resulting endpoints.
    pub async fn provision(&self) -> Result<Report, ProvisionError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("provision", %run_id);

        async move {
            info!(steps = Step::PLAN.len(), "Starting provisioning");
            let mut records = Vec::with_capacity(Step::PLAN.len());

            for step in Step::PLAN {
                info!("{step}");
                let started = Instant::now();

                let outcome = match self.run_step(step).await {
                    Ok(outcome) => outcome,
                    Err(e) if step.is_best_effort() => {
                        warn!(%step, error = %e, "Best-effort step failed, continuing");
                        StepOutcome::Failed(e.to_string())
                    }
                    Err(e) => {
                        error!(%step, error = %e, "Provisioning aborted");
                        return Err(e);
                    }
                };

                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(%step, outcome = ?outcome, elapsed_ms, "Step finished");
                records.push(StepRecord {
                    step,
                    outcome,
                    elapsed_ms,
                });
            }

            let report = Report::new(run_id, &self.config, records);
            info!(
                serving = %report.serving_endpoint,
                admin_ui = %report.admin_ui_endpoint,
                "Provisioning complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Execute a single step.
    pub async fn run_step(&self, step: Step) -> Result<StepOutcome, ProvisionError> {
        let cfg = &self.config;
        let host_err = |source: HostError| ProvisionError::Host { step, source };

        match step {
            Step::DisableNativeService => {
                if !cfg.host.disable_native_service {
                    return Ok(StepOutcome::Skipped("native service left running".into()));
                }
                self.adapters
                    .services
                    .stop_and_disable(&cfg.host.native_service_unit)
                    .await
                    .map_err(host_err)?;
                Ok(StepOutcome::Done)
            }

            Step::RemoveStaleContainer => {
                let name = &cfg.serving.container_name;
                let state = self
                    .adapters
                    .runtime
                    .container_state(name)
                    .await
                    .map_err(host_err)?;
                match state {
                    None => Ok(StepOutcome::Skipped(format!("no container named {name}"))),
                    Some(state) => {
                        info!(container = %name, ?state, "Removing existing container");
                        self.adapters
                            .runtime
                            .remove_container(name)
                            .await
                            .map_err(host_err)?;
                        Ok(StepOutcome::Done)
                    }
                }
            }

            Step::EnsureContainerRuntime => {
                self.ensure_component(Component::ContainerRuntime, false)
                    .await
            }

            Step::EnsureGpuRuntime => {
                let outcome = self.ensure_component(Component::GpuToolkit, true).await?;
                let devices = detect_devices(self.adapters.commands.as_ref()).await;
                if devices.is_empty() {
                    warn!("No NVIDIA devices detected; the serving container will have no GPU");
                }
                Ok(outcome)
            }

            Step::FetchServingImage => {
                let image = &cfg.serving.image;
                self.adapters
                    .runtime
                    .pull_image(image)
                    .await
                    .map_err(|source| ProvisionError::Fetch {
                        image: image.clone(),
                        source,
                    })?;
                Ok(StepOutcome::Done)
            }

            Step::LaunchServingContainer => self.launch(&cfg.serving_container()).await,

            Step::AwaitReadiness => {
                let endpoint = format!("http://127.0.0.1:{}", cfg.serving.port);
                readiness::wait_until_ready(
                    &cfg.readiness,
                    self.adapters.probe.as_ref(),
                    &endpoint,
                )
                .await?;
                Ok(StepOutcome::Done)
            }

            Step::PullModel => {
                let model = &cfg.serving.model_name;
                self.adapters
                    .runtime
                    .exec(&cfg.serving.container_name, &["ollama", "pull", model.as_str()])
                    .await
                    .map_err(|source| ProvisionError::ModelFetch {
                        model: model.clone(),
                        source,
                    })?;
                Ok(StepOutcome::Done)
            }

            Step::EnsureNetwork => {
                let created = self
                    .adapters
                    .runtime
                    .ensure_network(&cfg.network.name)
                    .await
                    .map_err(host_err)?;
                Ok(if created {
                    StepOutcome::Done
                } else {
                    StepOutcome::AlreadyPresent
                })
            }

            Step::LaunchDatabase => self.launch(&cfg.database_container()).await,

            Step::LaunchAdminUi => self.launch(&cfg.admin_ui_container()).await,
        }
    }

    /// Check-then-install. `always_configure` reruns configuration on an
    /// already-installed component.
    async fn ensure_component(
        &self,
        component: Component,
        always_configure: bool,
    ) -> Result<StepOutcome, ProvisionError> {
        let install_err = |source: HostError| ProvisionError::Install { component, source };
        let packages = &self.adapters.packages;

        let installed = packages.is_installed(component).await.map_err(install_err)?;
        if installed {
            info!(%component, "Already installed");
        } else {
            packages.install(component).await.map_err(install_err)?;
        }

        if !installed || always_configure {
            packages.configure(component).await.map_err(install_err)?;
        }

        Ok(if installed {
            StepOutcome::AlreadyPresent
        } else {
            StepOutcome::Done
        })
    }

    /// Replace any container of the same name, ensure its volumes, and start it.
    async fn launch(&self, spec: &ContainerSpec) -> Result<StepOutcome, ProvisionError> {
        let launch_err = |source: HostError| ProvisionError::Launch {
            container: spec.name.clone(),
            source,
        };
        let runtime = &self.adapters.runtime;

        if runtime.container_exists(&spec.name).await.map_err(launch_err)? {
            info!(container = %spec.name, "Replacing existing container");
            runtime.remove_container(&spec.name).await.map_err(launch_err)?;
        }

        for mount in &spec.volumes {
            runtime.ensure_volume(&mount.volume).await.map_err(launch_err)?;
        }

        let id = runtime.run_container(spec).await.map_err(launch_err)?;
        info!(
            container = %spec.name,
            image = %spec.image,
            id = %id.chars().take(12).collect::<String>(),
            "Container started"
        );
        Ok(StepOutcome::Done)
    }
}
