//! GPU device discovery.
//!
//! Queries `nvidia-smi` for the devices the container toolkit will expose.
//! Discovery is informational: provisioning continues without devices, but
//! the serving container will then run on CPU.

use serde::Serialize;
use tracing::{info, warn};

use crate::host::command::{CommandRunner, HostCommand, HostError};

/// Information about a single GPU device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDeviceInfo {
    /// Device index.
    pub id: usize,

    /// Device name (e.g., "NVIDIA GeForce RTX 3090").
    pub name: String,

    /// Total VRAM in bytes.
    pub total_vram: u64,

    /// Driver version reported by the host.
    pub driver_version: String,
}

fn query_command() -> HostCommand {
    HostCommand::new("nvidia-smi").args([
        "--query-gpu=index,name,memory.total,driver_version",
        "--format=csv,noheader,nounits",
    ])
}

/// Detect NVIDIA devices visible to the host driver.
///
/// A missing `nvidia-smi` or a failing query yields an empty list.
pub async fn detect_devices(runner: &dyn CommandRunner) -> Vec<GpuDeviceInfo> {
    let output = match runner.run_checked(&query_command()).await {
        Ok(out) => out,
        Err(e) => {
            warn!(error = %e, "nvidia-smi unavailable, no GPU devices detected");
            return Vec::new();
        }
    };

    match parse_devices(&output.stdout) {
        Ok(devices) => {
            for dev in &devices {
                info!(
                    id = dev.id,
                    name = %dev.name,
                    vram_mib = dev.total_vram / (1024 * 1024),
                    driver = %dev.driver_version,
                    "Detected GPU"
                );
            }
            devices
        }
        Err(e) => {
            warn!(error = %e, "Could not parse nvidia-smi output");
            Vec::new()
        }
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` rows.
pub fn parse_devices(csv: &str) -> Result<Vec<GpuDeviceInfo>, HostError> {
    csv.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [index, name, memory_mib, driver] = fields.as_slice() else {
                return Err(HostError::Parse(format!("expected 4 columns: {line}")));
            };

            let id = index
                .parse()
                .map_err(|_| HostError::Parse(format!("bad device index: {index}")))?;
            let mib: u64 = memory_mib
                .parse()
                .map_err(|_| HostError::Parse(format!("bad memory size: {memory_mib}")))?;
            let total_vram = mib
                .checked_mul(1024 * 1024)
                .ok_or_else(|| HostError::Parse(format!("memory size out of range: {memory_mib}")))?;

            Ok(GpuDeviceInfo {
                id,
                name: name.to_string(),
                total_vram,
                driver_version: driver.to_string(),
            })
        })
        .collect()
}
