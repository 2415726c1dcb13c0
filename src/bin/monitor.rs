//! cachewatch monitor binary
//!
//! Runs one monitor: self-assignment planning against the shared registry,
//! peer polling for non-owned cache groups, and the local HTTP surface.
//! Planning parameters come from `CACHEWATCH_*` environment variables so
//! the whole fleet shares them.

use cachewatch::config::MonitorConfig;
use cachewatch::monitor::Monitor;
use cachewatch::telemetry::Telemetry;

use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

/// cachewatch monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// This monitor's name; must match its entry in the CDN snapshot
    #[arg(long, env = "CACHEWATCH_MONITOR_NAME")]
    name: String,

    /// Address the local HTTP surface listens on
    #[arg(long, env = "CACHEWATCH_MONITOR_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Base URL of the shared registry
    #[arg(long, env = "CACHEWATCH_REGISTRY_URL")]
    registry_url: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("cachewatch-monitor", &args.log_level)?;

    let config = MonitorConfig::from_env(args.name, args.registry_url, args.listen)?;
    info!(
        monitor = %config.name,
        near_km = config.near_km,
        min_steal = config.min_steal,
        "starting monitor"
    );

    let monitor = Monitor::start(config).await?;

    shutdown_signal().await;

    info!("monitor shutting down");
    monitor.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
