//! systemd unit control.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::host::command::{CommandRunner, HostCommand, HostError};

#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Stop a unit and keep it from starting at boot.
    async fn stop_and_disable(&self, unit: &str) -> Result<(), HostError>;
}

/// `systemctl`-backed service control.
pub struct SystemdServices {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdServices {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ServiceControl for SystemdServices {
    async fn stop_and_disable(&self, unit: &str) -> Result<(), HostError> {
        // Both commands run even if the first fails; a unit that is already
        // stopped may still be enabled.
        let stop = self
            .runner
            .run_checked(&HostCommand::new("systemctl").args(["stop", unit]))
            .await;
        let disable = self
            .runner
            .run_checked(&HostCommand::new("systemctl").args(["disable", unit]))
            .await;

        debug!(unit, stopped = stop.is_ok(), disabled = disable.is_ok(), "systemctl finished");

        stop.and(disable).map(|_| ())
    }
}
