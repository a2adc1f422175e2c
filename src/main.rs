use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use llm_host_setup::config::{Cli, Config};
use llm_host_setup::provision::{Adapters, Provisioner};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llm_host_setup=debug"
    } else {
        "llm_host_setup=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(false)
        .init();

    info!("llm-host-setup v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_cli(&cli) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(2));
        }
    };

    info!(
        serving_port = config.serving.port,
        model = %config.serving.model_name,
        db_port = config.database.credentials.port,
        admin_ui_port = config.admin_ui.port,
        readiness = ?config.readiness.strategy,
        "Configuration loaded"
    );

    let adapters = Adapters::system(&config)?;
    let provisioner = Provisioner::new(config, adapters);

    match provisioner.provision().await {
        Ok(report) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let code = e.exit_code();
            eprintln!("error: {e}");
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
    }
}
