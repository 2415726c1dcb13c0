//! Registry HTTP service
//!
//! Serves the CDN snapshot and monitoring metadata, and holds the
//! authoritative assignment map. Assignment updates are partial merges:
//! each POSTed key's list is overwritten, keys not mentioned are unchanged,
//! and an empty list clears a monitor's entry.

use crate::telemetry;
use crate::topology::{Assignment, CdnSnapshot, MonitoringCacheGroup, MonitoringConfig};
use crate::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// On-disk seed for a registry: the CDN snapshot plus cache-group
/// coordinates, as loaded by the `registry` binary.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RegistrySeed {
    pub snapshot: CdnSnapshot,
    pub cachegroups: Vec<MonitoringCacheGroup>,
}

/// In-memory registry state.
#[derive(Default)]
pub struct RegistryState {
    snapshot: RwLock<CdnSnapshot>,
    cachegroups: RwLock<Vec<MonitoringCacheGroup>>,
    assignment: RwLock<Assignment>,
}

impl RegistryState {
    pub fn new(snapshot: CdnSnapshot, cachegroups: Vec<MonitoringCacheGroup>) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            cachegroups: RwLock::new(cachegroups),
            assignment: RwLock::new(Assignment::new()),
        }
    }

    pub fn from_seed(seed: RegistrySeed) -> Self {
        Self::new(seed.snapshot, seed.cachegroups)
    }

    /// Replace the CDN snapshot (topology changes, fleet control).
    pub async fn set_snapshot(&self, snapshot: CdnSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub async fn snapshot(&self) -> CdnSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn assignment(&self) -> Assignment {
        self.assignment.read().await.clone()
    }

    /// Merge an assignment delta: overwrite mentioned keys, clear keys
    /// posted with an empty list.
    pub async fn merge_assignment(&self, delta: Assignment) {
        let mut assignment = self.assignment.write().await;
        for (monitor, cache_groups) in delta {
            if cache_groups.is_empty() {
                assignment.remove(&monitor);
            } else {
                assignment.insert(monitor, cache_groups);
            }
        }
    }
}

/// Build the registry HTTP router.
pub fn router(state: Arc<RegistryState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/monitoring.json", get(get_monitoring))
        .route(
            "/monitor-polled-cachegroups",
            post(post_polled_cachegroups),
        )
        .with_state(state)
        .layer(middleware::from_fn(
            telemetry::http_observability_middleware,
        ))
        .layer(cors)
}

async fn get_snapshot(State(state): State<Arc<RegistryState>>) -> Json<CdnSnapshot> {
    Json(state.snapshot().await)
}

async fn get_monitoring(State(state): State<Arc<RegistryState>>) -> Json<MonitoringConfig> {
    let cachegroups = state.cachegroups.read().await.clone();
    let monitor_polled_cachegroups = state.assignment().await;
    Json(MonitoringConfig {
        cachegroups,
        monitor_polled_cachegroups,
    })
}

async fn post_polled_cachegroups(
    State(state): State<Arc<RegistryState>>,
    Json(delta): Json<Assignment>,
) -> StatusCode {
    state.merge_assignment(delta).await;
    StatusCode::NO_CONTENT
}

/// A bound, running registry server.
pub struct RegistryServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RegistryServer {
    /// Bind and start serving. Pass port 0 to pick an ephemeral port.
    pub async fn bind(state: Arc<RegistryState>, addr: SocketAddr) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let app = router(state);
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            });
            if let Err(e) = serve.await {
                error!("registry server error: {e}");
            }
        });

        info!(%addr, "registry serving");
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Drain in-flight requests and stop.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merge_overwrites_mentioned_keys_only() {
        let state = RegistryState::default();

        let mut delta = Assignment::new();
        delta.insert("tm0".to_string(), vec!["cg-a".to_string(), "cg-b".to_string()]);
        delta.insert("tm1".to_string(), vec!["cg-c".to_string()]);
        state.merge_assignment(delta).await;

        let mut delta = Assignment::new();
        delta.insert("tm0".to_string(), vec!["cg-b".to_string()]);
        state.merge_assignment(delta).await;

        let assignment = state.assignment().await;
        assert_eq!(assignment["tm0"], vec!["cg-b".to_string()]);
        assert_eq!(assignment["tm1"], vec!["cg-c".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_list_clears_a_monitor() {
        let state = RegistryState::default();

        let mut delta = Assignment::new();
        delta.insert("tm0".to_string(), vec!["cg-a".to_string()]);
        state.merge_assignment(delta).await;

        let mut delta = Assignment::new();
        delta.insert("tm0".to_string(), vec![]);
        state.merge_assignment(delta).await;

        assert!(state.assignment().await.is_empty());
    }
}
