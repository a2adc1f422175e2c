//! Runtime configuration for llm-host-setup.
//!
//! There is no configuration file. Every option has a default matching the
//! stock deployment, and the CLI (or the environment) can override the
//! recognized ones.

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::runtime::ContainerSpec;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Port for {0} must be non-zero")]
    ZeroPort(&'static str),

    #[error("Port {port} is used by both {first} and {second}")]
    PortCollision {
        port: u16,
        first: &'static str,
        second: &'static str,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// How step 7 waits for the serving container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReadinessStrategy {
    /// Sleep for a fixed delay, regardless of actual readiness.
    Fixed,
    /// Probe the serving endpoint with bounded retries and backoff.
    Poll,
}

/// Command-line arguments. Running with none provisions the default stack.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "llm-host-setup",
    about = "Provision this host for local LLM inference with Ollama and a Postgres/Adminer stack"
)]
pub struct Cli {
    /// Host port for the Ollama API.
    #[arg(long)]
    pub serving_port: Option<u16>,

    /// Model to pull into the serving container.
    #[arg(long)]
    pub model: Option<String>,

    /// Database user.
    #[arg(long, env = "POSTGRES_USER")]
    pub db_user: Option<String>,

    /// Database password.
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database name.
    #[arg(long, env = "POSTGRES_DB")]
    pub db_name: Option<String>,

    /// Host port for the database.
    #[arg(long)]
    pub db_port: Option<u16>,

    /// Host port for the admin UI.
    #[arg(long)]
    pub admin_ui_port: Option<u16>,

    /// Hostname used in the printed endpoints.
    #[arg(long)]
    pub advertise_host: Option<String>,

    /// Leave a host-native ollama service running.
    #[arg(long)]
    pub keep_native_service: bool,

    /// Readiness strategy for the serving container.
    #[arg(long, value_enum)]
    pub readiness: Option<ReadinessStrategy>,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Host-level settings.
    pub host: HostConfig,

    /// Model-serving container.
    pub serving: ServingConfig,

    /// Readiness wait after launching the serving container.
    pub readiness: ReadinessConfig,

    /// Auxiliary network shared by the database and admin UI.
    pub network: NetworkConfig,

    /// Database container.
    pub database: DatabaseConfig,

    /// Database admin UI container.
    pub admin_ui: AdminUiConfig,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Stop and disable a host-native inference service first, freeing its
    /// port and GPU.
    pub disable_native_service: bool,

    /// systemd unit of the native service.
    pub native_service_unit: String,

    /// Hostname printed in the report endpoints.
    pub advertise_host: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            disable_native_service: true,
            native_service_unit: "ollama".to_string(),
            advertise_host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub image: String,
    pub container_name: String,

    /// Named volume holding downloaded models.
    pub volume_name: String,

    /// Host port published for the API.
    pub port: u16,

    /// Model pulled after the container is up (e.g. "mistral:7b-instruct").
    pub model_name: String,

    /// `--gpus` value for the container.
    pub gpus: String,
}

impl ServingConfig {
    /// Port the Ollama API listens on inside the container.
    pub const CONTAINER_PORT: u16 = 11434;
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            image: "ollama/ollama:latest".to_string(),
            container_name: "ollama".to_string(),
            volume_name: "ollama".to_string(),
            port: 11434,
            model_name: "mistral:7b-instruct".to_string(),
            gpus: "all".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub strategy: ReadinessStrategy,

    /// Sleep length for [`ReadinessStrategy::Fixed`].
    pub delay_secs: u64,

    /// Probe attempts for [`ReadinessStrategy::Poll`].
    pub max_attempts: u32,

    /// First backoff between probes; doubles up to `max_backoff_ms`.
    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Per-probe HTTP timeout.
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            strategy: ReadinessStrategy::Poll,
            delay_secs: 10,
            max_attempts: 30,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            probe_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "hr_network".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
    pub db_name: String,

    /// Host port published for the database.
    pub port: u16,
}

impl Default for DatabaseCredentials {
    fn default() -> Self {
        Self {
            user: "hr_user".to_string(),
            password: "hr_password".to_string(),
            db_name: "hr_db".to_string(),
            port: 5433,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub image: String,
    pub container_name: String,

    /// Named volume for the data directory; survives container replacement.
    pub volume_name: String,

    pub credentials: DatabaseCredentials,
}

impl DatabaseConfig {
    pub const CONTAINER_PORT: u16 = 5432;
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            image: "postgres:16".to_string(),
            container_name: "hr_postgres".to_string(),
            volume_name: "hr_pgdata".to_string(),
            credentials: DatabaseCredentials::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminUiConfig {
    pub image: String,
    pub container_name: String,

    /// Host port published for the web UI.
    pub port: u16,
}

impl AdminUiConfig {
    pub const CONTAINER_PORT: u16 = 8080;
}

impl Default for AdminUiConfig {
    fn default() -> Self {
        Self {
            image: "adminer:latest".to_string(),
            container_name: "hr_adminer".to_string(),
            port: 8081,
        }
    }
}

impl Config {
    /// Build a configuration from defaults plus CLI overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(port) = cli.serving_port {
            config.serving.port = port;
        }
        if let Some(model) = &cli.model {
            config.serving.model_name = model.clone();
        }
        if let Some(user) = &cli.db_user {
            config.database.credentials.user = user.clone();
        }
        if let Some(password) = &cli.db_password {
            config.database.credentials.password = password.clone();
        }
        if let Some(name) = &cli.db_name {
            config.database.credentials.db_name = name.clone();
        }
        if let Some(port) = cli.db_port {
            config.database.credentials.port = port;
        }
        if let Some(port) = cli.admin_ui_port {
            config.admin_ui.port = port;
        }
        if let Some(host) = &cli.advertise_host {
            config.host.advertise_host = host.clone();
        }
        if let Some(strategy) = cli.readiness {
            config.readiness.strategy = strategy;
        }
        config.host.disable_native_service = !cli.keep_native_service;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never provision successfully.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ports = [
            ("serving", self.serving.port),
            ("database", self.database.credentials.port),
            ("admin UI", self.admin_ui.port),
        ];

        for (i, &(name, port)) in ports.iter().enumerate() {
            if port == 0 {
                return Err(ConfigError::ZeroPort(name));
            }
            if let Some(&(other, _)) = ports[..i].iter().find(|(_, p)| *p == port) {
                return Err(ConfigError::PortCollision {
                    port,
                    first: other,
                    second: name,
                });
            }
        }

        let names = [
            ("model name", &self.serving.model_name),
            ("database user", &self.database.credentials.user),
            ("database name", &self.database.credentials.db_name),
            ("network name", &self.network.name),
        ];
        for (what, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(what));
            }
        }

        Ok(())
    }

    /// Base URL of the inference API.
    pub fn serving_endpoint(&self) -> String {
        format!("http://{}:{}", self.host.advertise_host, self.serving.port)
    }

    /// URL of the admin UI.
    pub fn admin_ui_endpoint(&self) -> String {
        format!("http://{}:{}", self.host.advertise_host, self.admin_ui.port)
    }

    /// `host:port` of the database.
    pub fn database_endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.host.advertise_host, self.database.credentials.port
        )
    }

    /// Serving container: GPU access, model volume, published API port.
    pub fn serving_container(&self) -> ContainerSpec {
        ContainerSpec::new(&self.serving.container_name, &self.serving.image)
            .gpus(&self.serving.gpus)
            .volume(&self.serving.volume_name, "/root/.ollama")
            .port(self.serving.port, ServingConfig::CONTAINER_PORT)
    }

    /// Database container on the auxiliary network.
    pub fn database_container(&self) -> ContainerSpec {
        let creds = &self.database.credentials;
        ContainerSpec::new(&self.database.container_name, &self.database.image)
            .network(&self.network.name)
            .restart("unless-stopped")
            .env("POSTGRES_USER", &creds.user)
            .secret_env("POSTGRES_PASSWORD", &creds.password)
            .env("POSTGRES_DB", &creds.db_name)
            .volume(&self.database.volume_name, "/var/lib/postgresql/data")
            .port(creds.port, DatabaseConfig::CONTAINER_PORT)
    }

    /// Admin UI container, pointed at the database by container name.
    pub fn admin_ui_container(&self) -> ContainerSpec {
        ContainerSpec::new(&self.admin_ui.container_name, &self.admin_ui.image)
            .network(&self.network.name)
            .restart("unless-stopped")
            .env("ADMINER_DEFAULT_SERVER", &self.database.container_name)
            .port(self.admin_ui.port, AdminUiConfig::CONTAINER_PORT)
    }
}
