//! cachewatch fleet harness
//!
//! Runs a registry plus N monitors in one process, with a control surface
//! for stopping and starting individual monitors while the rest of the
//! fleet rebalances. Useful for watching the self-assignment loop converge
//! without deploying anything.

use cachewatch::config::MonitorConfig;
use cachewatch::geo::Coordinate;
use cachewatch::monitor::Monitor;
use cachewatch::registry::{RegistrySeed, RegistryServer, RegistryState};
use cachewatch::telemetry::Telemetry;
use cachewatch::topology::{
    CdnSnapshot, MonitorName, MonitorStatus, MonitoringCacheGroup, SnapshotCache, SnapshotMonitor,
};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::info;

/// cachewatch fleet harness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of monitors to run
    #[arg(long, default_value = "5")]
    monitors: usize,

    /// Number of cache groups in the synthetic topology
    #[arg(long, default_value = "10")]
    cachegroups: usize,

    /// Registry port
    #[arg(long, default_value = "19999")]
    registry_port: u16,

    /// Control surface port
    #[arg(long, default_value = "19998")]
    control_port: u16,

    /// First monitor port; monitor i listens on base + i
    #[arg(long, default_value = "20000")]
    monitor_base_port: u16,

    /// Seconds to wait between monitor starts, giving each new monitor
    /// time to steal and rebalance
    #[arg(long, default_value = "5")]
    start_stagger_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct MonitorSlot {
    config: MonitorConfig,
    port: u16,
    running: Option<Monitor>,
}

struct FleetState {
    registry: Arc<RegistryState>,
    registry_addr: SocketAddr,
    slots: Mutex<BTreeMap<MonitorName, MonitorSlot>>,
}

impl FleetState {
    /// Flip a monitor's status in the CDN snapshot so the fleet sees the
    /// change on its next topology poll.
    async fn set_monitor_status(&self, name: &str, status: MonitorStatus) {
        let mut snapshot = self.registry.snapshot().await;
        if let Some(monitor) = snapshot.monitors.get_mut(name) {
            monitor.status = status;
            self.registry.set_snapshot(snapshot).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("cachewatch-fleet", &args.log_level)?;

    let seed = synthetic_seed(args.monitors, args.cachegroups, args.monitor_base_port);
    let registry_state = Arc::new(RegistryState::from_seed(seed));
    let registry = RegistryServer::bind(
        registry_state.clone(),
        SocketAddr::from(([127, 0, 0, 1], args.registry_port)),
    )
    .await?;
    let registry_url = registry.base_url();

    let mut slots = BTreeMap::new();
    for i in 0..args.monitors {
        let name = monitor_name(i);
        let port = args.monitor_base_port + i as u16;
        let config = MonitorConfig::from_env(
            name.clone(),
            registry_url.clone(),
            SocketAddr::from(([127, 0, 0, 1], port)),
        )?;
        slots.insert(
            name,
            MonitorSlot {
                config,
                port,
                running: None,
            },
        );
    }

    let fleet = Arc::new(FleetState {
        registry: registry_state,
        registry_addr: registry.local_addr(),
        slots: Mutex::new(slots),
    });

    let control = Router::new()
        .route("/api/servers", get(servers))
        .route("/api/start-monitor/:name", post(start_monitor))
        .route("/api/stop-monitor/:name", post(stop_monitor))
        .with_state(fleet.clone());
    let control_listener =
        tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], args.control_port)))
            .await?;
    info!(addr = %control_listener.local_addr()?, "fleet control surface serving");
    let control_task = tokio::spawn(async move {
        let _ = axum::serve(control_listener, control).await;
    });

    // Stagger the starts so each new monitor gets to steal and rebalance
    // before the next one joins.
    let names: Vec<MonitorName> = fleet.slots.lock().await.keys().cloned().collect();
    for name in names {
        start_slot(&fleet, &name).await?;
        tokio::time::sleep(Duration::from_secs(args.start_stagger_secs)).await;
    }

    shutdown_signal().await;

    info!("fleet shutting down");
    control_task.abort();
    let mut slots = fleet.slots.lock().await;
    for (_, slot) in slots.iter_mut() {
        if let Some(monitor) = slot.running.take() {
            monitor.stop().await;
        }
    }
    drop(slots);
    registry.stop().await;
    Ok(())
}

fn monitor_name(i: usize) -> MonitorName {
    format!("tm{i}")
}

/// Build a synthetic CDN: cache groups strung along a parallel ~650 km
/// apart, two caches each, monitors placed round-robin across them.
fn synthetic_seed(monitors: usize, cachegroups: usize, monitor_base_port: u16) -> RegistrySeed {
    let mut snapshot = CdnSnapshot::default();
    let mut coords = Vec::new();

    for i in 0..cachegroups {
        let name = format!("cg{i:02}");
        let coordinate = Coordinate::new(39.0, -120.0 + i as f64 * 7.5);
        snapshot
            .edge_cachegroups
            .insert(name.clone(), Some(coordinate));
        coords.push(MonitoringCacheGroup {
            name: name.clone(),
            coordinates: coordinate,
        });

        for suffix in ["a", "b"] {
            snapshot.caches.insert(
                format!("edge-{name}-{suffix}"),
                SnapshotCache {
                    cachegroup: name.clone(),
                },
            );
        }
    }

    for i in 0..monitors {
        snapshot.monitors.insert(
            monitor_name(i),
            SnapshotMonitor {
                host: "127.0.0.1".to_string(),
                port: monitor_base_port + i as u16,
                status: MonitorStatus::Online,
                location: Some(format!("cg{:02}", i % cachegroups.max(1))),
            },
        );
    }

    RegistrySeed {
        snapshot,
        cachegroups: coords,
    }
}

async fn start_slot(fleet: &Arc<FleetState>, name: &str) -> cachewatch::Result<bool> {
    let mut slots = fleet.slots.lock().await;
    let Some(slot) = slots.get_mut(name) else {
        return Ok(false);
    };
    if slot.running.is_some() {
        return Ok(true);
    }
    info!(monitor = %name, port = slot.port, "starting fleet monitor");
    let monitor = Monitor::start(slot.config.clone()).await?;
    slot.running = Some(monitor);
    drop(slots);
    fleet.set_monitor_status(name, MonitorStatus::Online).await;
    Ok(true)
}

#[derive(Serialize)]
struct ServerEntry {
    addr: String,
    running: bool,
}

#[derive(Serialize)]
struct ServersResponse {
    registry: ServerEntry,
    monitors: BTreeMap<MonitorName, ServerEntry>,
}

async fn servers(State(fleet): State<Arc<FleetState>>) -> Json<ServersResponse> {
    let slots = fleet.slots.lock().await;
    let monitors = slots
        .iter()
        .map(|(name, slot)| {
            (
                name.clone(),
                ServerEntry {
                    addr: format!("127.0.0.1:{}", slot.port),
                    running: slot.running.is_some(),
                },
            )
        })
        .collect();
    Json(ServersResponse {
        registry: ServerEntry {
            addr: fleet.registry_addr.to_string(),
            running: true,
        },
        monitors,
    })
}

async fn start_monitor(
    State(fleet): State<Arc<FleetState>>,
    Path(name): Path<String>,
) -> StatusCode {
    match start_slot(&fleet, &name).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!(monitor = %name, "failed to start monitor: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn stop_monitor(
    State(fleet): State<Arc<FleetState>>,
    Path(name): Path<String>,
) -> StatusCode {
    let monitor = {
        let mut slots = fleet.slots.lock().await;
        let Some(slot) = slots.get_mut(&name) else {
            return StatusCode::NOT_FOUND;
        };
        slot.running.take()
    };

    if let Some(monitor) = monitor {
        info!(monitor = %name, "stopping fleet monitor");
        fleet
            .set_monitor_status(&name, MonitorStatus::Offline)
            .await;
        monitor.stop().await;
    }
    StatusCode::NO_CONTENT
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
