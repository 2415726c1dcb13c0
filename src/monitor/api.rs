//! Per-monitor HTTP surface
//!
//! Read-only views of this monitor's claim list, its peer-sourced data, and
//! the raw health snapshots. Handlers copy the minimum view under the
//! shared section and hand owned values to axum, so JSON serialization
//! happens outside every critical section.

use crate::monitor::failure::PeerState;
use crate::monitor::store::SnapshotSource;
use crate::monitor::{MonitorState, PeerData};
use crate::telemetry;
use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the local-service router.
pub fn router(state: Arc<MonitorState>) -> Router {
    Router::new()
        .route("/api/polled-cachegroups", get(polled_cachegroups))
        .route("/api/peer-data", get(peer_data))
        .route("/publish/crstates", get(crstates))
        .route("/publish/dsstats", get(dsstats))
        .route("/publish/cachestats", get(cachestats))
        .route("/publish/peerstates", get(peerstates))
        .with_state(state)
        .layer(middleware::from_fn(
            telemetry::http_observability_middleware,
        ))
}

/// The cache groups this monitor currently claims.
async fn polled_cachegroups(State(state): State<Arc<MonitorState>>) -> Json<Vec<String>> {
    Json(state.owned_cache_groups().await)
}

/// What each polled peer last reported claiming.
async fn peer_data(
    State(state): State<Arc<MonitorState>>,
) -> Json<BTreeMap<String, PeerData>> {
    Json(state.peer_data.read().await.clone())
}

#[derive(Serialize)]
struct IsAvailable {
    is_available: bool,
}

#[derive(Serialize)]
struct CrStates {
    caches: BTreeMap<String, IsAvailable>,
}

/// Raw availability snapshot, keyed by cache.
async fn crstates(State(state): State<Arc<MonitorState>>) -> Json<CrStates> {
    let snapshots = state.store.all();
    let mut caches = BTreeMap::new();
    for snapshot in snapshots {
        for (cache, health) in snapshot.caches {
            caches.insert(
                cache,
                IsAvailable {
                    is_available: health.available,
                },
            );
        }
    }
    Json(CrStates { caches })
}

#[derive(Serialize)]
struct CacheGroupStat {
    caches_total: usize,
    caches_available: usize,
    timestamp: DateTime<Utc>,
    source: SnapshotSource,
}

#[derive(Serialize)]
struct DsStats {
    cache_groups: BTreeMap<String, CacheGroupStat>,
}

/// Per-cache-group availability rollup.
async fn dsstats(State(state): State<Arc<MonitorState>>) -> Json<DsStats> {
    let cache_groups = state
        .store
        .all()
        .into_iter()
        .map(|snapshot| {
            let stat = CacheGroupStat {
                caches_total: snapshot.caches.len(),
                caches_available: snapshot.caches_available(),
                timestamp: snapshot.timestamp,
                source: snapshot.source,
            };
            (snapshot.cache_group, stat)
        })
        .collect();
    Json(DsStats { cache_groups })
}

#[derive(Serialize)]
struct CacheStat {
    available: bool,
    cache_group: String,
    last_polled: DateTime<Utc>,
}

#[derive(Serialize)]
struct CacheStats {
    caches: BTreeMap<String, CacheStat>,
}

/// Per-cache stats from the latest snapshots.
async fn cachestats(State(state): State<Arc<MonitorState>>) -> Json<CacheStats> {
    let snapshots = state.store.all();
    let mut caches = BTreeMap::new();
    for snapshot in snapshots {
        for (cache, health) in snapshot.caches {
            caches.insert(
                cache,
                CacheStat {
                    available: health.available,
                    cache_group: snapshot.cache_group.clone(),
                    last_polled: snapshot.timestamp,
                },
            );
        }
    }
    Json(CacheStats { caches })
}

#[derive(Serialize)]
struct PeerStates {
    peers: BTreeMap<String, PeerState>,
}

/// Liveness view of the peers this monitor polls.
async fn peerstates(State(state): State<Arc<MonitorState>>) -> Json<PeerStates> {
    Json(PeerStates {
        peers: state.failures.states(),
    })
}
