//! In-process cache-group data store
//!
//! Holds the most recent availability snapshot per cache group, whether
//! produced by the local health poller or received via a peer. Writers and
//! readers share one read-write section covering only the publish step;
//! serialization always happens on a copied view outside it.

use crate::topology::{CacheGroupName, CacheName, MonitorName};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where a snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "monitor")]
pub enum SnapshotSource {
    /// Produced by this monitor's own health poller.
    Local,
    /// Received from the named peer.
    Peer(MonitorName),
}

/// Health of one cache server.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub available: bool,
}

/// The latest known state of one cache group.
#[derive(Debug, Clone, Serialize)]
pub struct CgSnapshot {
    pub cache_group: CacheGroupName,
    /// Per-cache availability. Empty for peer-sourced snapshots: the peer
    /// wire format only carries claim coverage.
    pub caches: BTreeMap<CacheName, CacheHealth>,
    pub timestamp: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl CgSnapshot {
    pub fn caches_available(&self) -> usize {
        self.caches.values().filter(|c| c.available).count()
    }
}

/// Latest snapshot per cache group. One snapshot per group: later writes
/// for the same group replace earlier ones.
#[derive(Default)]
pub struct CgDataStore {
    snapshots: RwLock<BTreeMap<CacheGroupName, CgSnapshot>>,
}

impl CgDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot, replacing any previous one for the same group.
    pub fn publish(&self, snapshot: CgSnapshot) {
        let mut snapshots = self.snapshots.write();
        snapshots.insert(snapshot.cache_group.clone(), snapshot);
    }

    pub fn get(&self, cache_group: &str) -> Option<CgSnapshot> {
        self.snapshots.read().get(cache_group).cloned()
    }

    /// Copy of every current snapshot.
    pub fn all(&self) -> Vec<CgSnapshot> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Drop snapshots for cache groups not in `keep` (topology shrank).
    pub fn retain(&self, keep: &std::collections::BTreeSet<CacheGroupName>) {
        self.snapshots.write().retain(|cg, _| keep.contains(cg));
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cg: &str, source: SnapshotSource, available: bool) -> CgSnapshot {
        let mut caches = BTreeMap::new();
        caches.insert("edge-01".to_string(), CacheHealth { available });
        CgSnapshot {
            cache_group: cg.to_string(),
            caches,
            timestamp: Utc::now(),
            source,
        }
    }

    #[test]
    fn test_later_snapshot_replaces_earlier() {
        let store = CgDataStore::new();

        store.publish(snapshot("cg-a", SnapshotSource::Local, true));
        store.publish(snapshot("cg-a", SnapshotSource::Peer("tm1".to_string()), false));

        assert_eq!(store.len(), 1);
        let current = store.get("cg-a").unwrap();
        assert_eq!(current.source, SnapshotSource::Peer("tm1".to_string()));
        assert_eq!(current.caches_available(), 0);
    }

    #[test]
    fn test_retain_drops_departed_groups() {
        let store = CgDataStore::new();
        store.publish(snapshot("cg-a", SnapshotSource::Local, true));
        store.publish(snapshot("cg-b", SnapshotSource::Local, true));

        let keep = ["cg-b".to_string()].into_iter().collect();
        store.retain(&keep);

        assert!(store.get("cg-a").is_none());
        assert!(store.get("cg-b").is_some());
    }
}
