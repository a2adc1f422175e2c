//! llm-host-setup: provision a single host for local LLM inference.
//!
//! Disables a host-native Ollama service, installs Docker and the NVIDIA
//! container toolkit, launches the Ollama serving container, pulls a model,
//! and starts a Postgres + Adminer stack on a private network. Every step is
//! idempotent, so the whole plan can be re-run on a provisioned host.

pub mod config;
pub mod host;
pub mod provision;
pub mod report;
pub mod runtime;
