use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_daemon::{default_config_path, router, Config, SyncService};
use fleet_ssh::SshTransport;

#[derive(Parser)]
#[command(name = "fleetsyncd")]
#[command(about = "Plan-and-confirm directory sync between fleet hosts", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config (default: ~/.fleetsync/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the API bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)?;
    let bind = cli.bind.unwrap_or(config.api.bind);
    let eviction_interval = Duration::from_secs(config.api.eviction_interval_secs);

    if config.security.operation_confirm_code.is_none() {
        info!("No operation_confirm_code configured; sync runs are disabled");
    }

    let transport = Arc::new(SshTransport::new(config.ssh_config()));
    let service =
        Arc::new(SyncService::new(config, transport).context("Failed to build sync service")?);

    let sweeper = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(eviction_interval);
            loop {
                interval.tick().await;
                service.evict_expired();
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("fleetsyncd listening on {}", bind);

    let served = axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await;

    sweeper.abort();
    served.context("HTTP server failed")
}
