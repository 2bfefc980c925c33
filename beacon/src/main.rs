mod server;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use beacon_core::{logging, Config, SystemClock};
use beacon_registry::{Services, TcpProbe};

use server::BeaconServer;

/// Service registry with discovery, heartbeats and active health checks
#[derive(Debug, Parser)]
#[command(name = "beacon", version)]
struct Cli {
    /// Path to a YAML/TOML/JSON config file
    #[arg(short, long)]
    config: Option<String>,
}

const CONFIG_ENV: &str = "BEACON_CONFIG_PATH";
const DEFAULT_CONFIG: &str = "config.yaml";

/// `--config`, then `BEACON_CONFIG_PATH`, then `./config.yaml` if it exists
fn resolve_config_path(cli: Option<String>, env: Option<String>) -> Option<String> {
    cli.or(env).or_else(|| {
        Path::new(DEFAULT_CONFIG)
            .exists()
            .then(|| DEFAULT_CONFIG.to_string())
    })
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Ok(Config::from_file(path)?)
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Ok(Config::from_env()?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let path = resolve_config_path(cli.config, std::env::var(CONFIG_ENV).ok());
    let config = load_config(path.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Beacon registry starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Wire services
    let services = Services::from_config(&config, SystemClock::shared(), Arc::new(TcpProbe))?;

    // 5. Background tasks
    let token = CancellationToken::new();
    let mut tasks = services.maintenance.clone().start(token.clone());
    if config.health_check.enabled {
        let every = Duration::from_secs(config.health_check.sweep_interval_secs);
        tasks.push(services.health.clone().start(every, token.clone()));
        info!("Periodic health checks every {:?}", every);
    } else {
        info!("Periodic health checks disabled");
    }

    // 6. Serve until shutdown
    let server = BeaconServer::new(config, services, token.clone());
    let result = server.run().await;

    token.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task failed: {}", e);
        }
    }
    info!("Beacon registry stopped");
    result
}
