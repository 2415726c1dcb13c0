//! cachewatch registry binary
//!
//! Serves the CDN snapshot, monitoring metadata, and the shared assignment
//! map the monitor fleet coordinates through.

use cachewatch::registry::{RegistrySeed, RegistryServer, RegistryState};
use cachewatch::telemetry::Telemetry;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// cachewatch registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "CACHEWATCH_REGISTRY_LISTEN", default_value = "0.0.0.0:19999")]
    listen: SocketAddr,

    /// Path to the JSON topology seed (CDN snapshot + cache-group coordinates)
    #[arg(long, env = "CACHEWATCH_REGISTRY_SEED")]
    seed: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("cachewatch-registry", &args.log_level)?;

    let seed_raw = std::fs::read_to_string(&args.seed)?;
    let seed: RegistrySeed = serde_json::from_str(&seed_raw)?;
    info!(
        monitors = seed.snapshot.monitors.len(),
        cachegroups = seed.snapshot.edge_cachegroups.len(),
        "loaded topology seed"
    );

    let state = Arc::new(RegistryState::from_seed(seed));
    let server = RegistryServer::bind(state, args.listen).await?;

    shutdown_signal().await;

    info!("registry shutting down");
    server.stop().await;
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
