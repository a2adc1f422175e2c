//! Waiting for the serving container to accept requests.
//!
//! Two strategies are supported. `Fixed` sleeps for a constant delay and
//! then assumes the service is up; under slow image initialisation the model
//! pull that follows can then fail. `Poll` asks a [`ReadinessProbe`] with
//! exponential backoff and fails with
//! [`ProvisionError::ReadinessTimeout`] once the attempts run out.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{ReadinessConfig, ReadinessStrategy};
use crate::provision::ProvisionError;

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `true` once the service at `endpoint` answers.
    async fn is_ready(&self, endpoint: &str) -> bool;
}

/// Probes the Ollama API version route over HTTP.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn is_ready(&self, endpoint: &str) -> bool {
        let url = format!("{}/api/version", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                false
            }
        }
    }
}

/// Block until the endpoint is ready according to `config.strategy`.
///
/// Returns the number of probes issued (zero for the fixed delay).
pub async fn wait_until_ready(
    config: &ReadinessConfig,
    probe: &dyn ReadinessProbe,
    endpoint: &str,
) -> Result<u32, ProvisionError> {
    match config.strategy {
        ReadinessStrategy::Fixed => {
            info!(delay_secs = config.delay_secs, "Waiting a fixed delay");
            sleep(Duration::from_secs(config.delay_secs)).await;
            Ok(0)
        }
        ReadinessStrategy::Poll => poll(config, probe, endpoint).await,
    }
}

async fn poll(
    config: &ReadinessConfig,
    probe: &dyn ReadinessProbe,
    endpoint: &str,
) -> Result<u32, ProvisionError> {
    let max_backoff = Duration::from_millis(config.max_backoff_ms);
    let mut backoff = Duration::from_millis(config.initial_backoff_ms).min(max_backoff);

    for attempt in 1..=config.max_attempts {
        if probe.is_ready(endpoint).await {
            info!(endpoint, attempt, "Serving endpoint ready");
            return Ok(attempt);
        }

        if attempt < config.max_attempts {
            debug!(endpoint, attempt, backoff_ms = backoff.as_millis() as u64, "Not ready yet");
            sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    Err(ProvisionError::ReadinessTimeout {
        endpoint: endpoint.to_string(),
        attempts: config.max_attempts,
    })
}
