//! Local cache-health polling
//!
//! Produces availability snapshots for the cache groups this monitor owns.
//! The actual measurement is behind the `ReachabilityProbe` seam; the
//! shipped probe assumes reachability, which is enough for coordination and
//! for exercising the data path.

use crate::monitor::store::{CacheHealth, CgSnapshot, SnapshotSource};
use crate::monitor::MonitorState;
use crate::topology::CacheName;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Measures whether a single cache server is healthy.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, cache: &CacheName) -> bool;
}

/// Probe that reports every cache reachable.
pub struct AssumeReachable;

#[async_trait]
impl ReachabilityProbe for AssumeReachable {
    async fn probe(&self, _cache: &CacheName) -> bool {
        true
    }
}

/// Periodically snapshot every owned cache group through the probe.
pub(crate) async fn run(
    state: Arc<MonitorState>,
    probe: Arc<dyn ReachabilityProbe>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(state.config.health_poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }

        let Some(topology) = state.topology.read().await.clone() else {
            continue; // nothing to snapshot before the first topology poll
        };
        let owned = state
            .assignment
            .read()
            .await
            .get(&state.config.name)
            .cloned()
            .unwrap_or_default();

        for cache_group in owned {
            let mut caches = BTreeMap::new();
            for cache in topology.caches_in_group(&cache_group) {
                let available = probe.probe(&cache).await;
                caches.insert(cache, CacheHealth { available });
            }
            debug!(
                cachegroup = %cache_group,
                caches = caches.len(),
                "publishing local health snapshot"
            );
            state.store.publish(CgSnapshot {
                cache_group,
                caches,
                timestamp: Utc::now(),
                source: SnapshotSource::Local,
            });
        }
    }
}
