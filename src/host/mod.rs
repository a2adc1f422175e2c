//! Host adapters.
//!
//! - [`command`]: host command execution
//! - [`systemd`]: stopping and disabling native services
//! - [`packages`]: container runtime and GPU toolkit installation
//! - [`gpu`]: NVIDIA device discovery

pub mod command;
pub mod gpu;
pub mod packages;
pub mod systemd;
