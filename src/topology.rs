//! CDN topology types
//!
//! The registry serves the topology in two parts, and monitors merge them:
//! the CDN snapshot (`GET /snapshot`) carries the monitor fleet and the edge
//! cache groups the CDN wants polled; the monitoring metadata
//! (`GET /monitoring.json`) carries cache-group coordinates and the current
//! assignment map. A monitor's own coordinate resolves through the cache
//! group it is located in.

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Unique stable identifier of a monitor.
pub type MonitorName = String;
/// Unique stable identifier of a cache group.
pub type CacheGroupName = String;
/// Unique stable identifier of a cache server.
pub type CacheName = String;

/// Fleet-wide map from monitor to the cache groups it claims.
///
/// Held authoritatively by the registry; every monitor keeps a cached copy
/// refreshed each topology poll.
pub type Assignment = BTreeMap<MonitorName, Vec<CacheGroupName>>;

/// Upstream status of a monitor. Only ONLINE and REPORTED participate in
/// planning; OFFLINE and ADMIN_DOWN entries are garbage-collected by peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorStatus {
    Online,
    Reported,
    AdminDown,
    Offline,
}

impl MonitorStatus {
    pub fn participates(&self) -> bool {
        matches!(self, MonitorStatus::Online | MonitorStatus::Reported)
    }
}

/// A monitor as it appears in the CDN snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMonitor {
    pub host: String,
    pub port: u16,
    pub status: MonitorStatus,
    /// Cache group this monitor is located in; resolves to a coordinate
    /// through the monitoring metadata.
    #[serde(default)]
    pub location: Option<CacheGroupName>,
}

impl SnapshotMonitor {
    /// Base URL peers use to reach this monitor.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A cache server as it appears in the CDN snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCache {
    pub cachegroup: CacheGroupName,
}

/// CDN snapshot served by the registry (`GET /snapshot`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CdnSnapshot {
    pub monitors: BTreeMap<MonitorName, SnapshotMonitor>,
    /// Edge cache groups the CDN wants polled. A missing coordinate
    /// excludes the group from equidistance classification but not from
    /// polling.
    pub edge_cachegroups: BTreeMap<CacheGroupName, Option<Coordinate>>,
    #[serde(default)]
    pub caches: BTreeMap<CacheName, SnapshotCache>,
}

/// One cache group's coordinate entry in the monitoring metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringCacheGroup {
    pub name: CacheGroupName,
    pub coordinates: Coordinate,
}

/// Monitoring metadata served by the registry (`GET /monitoring.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub cachegroups: Vec<MonitoringCacheGroup>,
    #[serde(default)]
    pub monitor_polled_cachegroups: Assignment,
}

/// One monitor in the merged topology.
#[derive(Debug, Clone)]
pub struct MonitorEntry {
    pub base_url: String,
    pub status: MonitorStatus,
    pub coordinate: Option<Coordinate>,
}

/// Merged, snapshot-typed view of the CDN a monitor plans against.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub monitors: BTreeMap<MonitorName, MonitorEntry>,
    /// Required cache groups and their coordinates.
    pub cache_groups: BTreeMap<CacheGroupName, Option<Coordinate>>,
    pub caches: BTreeMap<CacheName, CacheGroupName>,
}

impl Topology {
    /// Merge a CDN snapshot and monitoring metadata into one topology.
    ///
    /// Monitors whose location cache group has no coordinate entry keep a
    /// `None` coordinate and are excluded from equidistance for the cycle.
    pub fn from_parts(snapshot: &CdnSnapshot, monitoring: &MonitoringConfig) -> Self {
        let cg_coords: BTreeMap<&str, Coordinate> = monitoring
            .cachegroups
            .iter()
            .map(|cg| (cg.name.as_str(), cg.coordinates))
            .collect();

        let monitors = snapshot
            .monitors
            .iter()
            .map(|(name, m)| {
                let coordinate = match m.location.as_deref() {
                    Some(location) => {
                        let coord = cg_coords.get(location).copied();
                        if coord.is_none() {
                            warn!(
                                monitor = %name,
                                location = %location,
                                "monitor location has no coordinate in monitoring metadata"
                            );
                        }
                        coord
                    }
                    None => {
                        warn!(monitor = %name, "monitor has no location cache group");
                        None
                    }
                };
                (
                    name.clone(),
                    MonitorEntry {
                        base_url: m.base_url(),
                        status: m.status,
                        coordinate,
                    },
                )
            })
            .collect();

        let caches = snapshot
            .caches
            .iter()
            .map(|(name, c)| (name.clone(), c.cachegroup.clone()))
            .collect();

        Self {
            monitors,
            cache_groups: snapshot.edge_cachegroups.clone(),
            caches,
        }
    }

    /// The set of cache groups the CDN wants polled.
    pub fn required_cache_groups(&self) -> BTreeSet<CacheGroupName> {
        self.cache_groups.keys().cloned().collect()
    }

    /// Caches belonging to the given cache group.
    pub fn caches_in_group(&self, group: &str) -> Vec<CacheName> {
        self.caches
            .iter()
            .filter(|(_, cg)| cg.as_str() == group)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CdnSnapshot {
        let mut monitors = BTreeMap::new();
        monitors.insert(
            "tm0".to_string(),
            SnapshotMonitor {
                host: "10.0.0.1".to_string(),
                port: 8080,
                status: MonitorStatus::Online,
                location: Some("cg-east".to_string()),
            },
        );
        monitors.insert(
            "tm1".to_string(),
            SnapshotMonitor {
                host: "10.0.0.2".to_string(),
                port: 8080,
                status: MonitorStatus::Offline,
                location: Some("cg-unknown".to_string()),
            },
        );

        let mut edge = BTreeMap::new();
        edge.insert(
            "cg-east".to_string(),
            Some(Coordinate::new(33.0, -84.0)),
        );
        edge.insert("cg-nocoord".to_string(), None);

        let mut caches = BTreeMap::new();
        caches.insert(
            "edge-01".to_string(),
            SnapshotCache {
                cachegroup: "cg-east".to_string(),
            },
        );

        CdnSnapshot {
            monitors,
            edge_cachegroups: edge,
            caches,
        }
    }

    fn monitoring() -> MonitoringConfig {
        MonitoringConfig {
            cachegroups: vec![MonitoringCacheGroup {
                name: "cg-east".to_string(),
                coordinates: Coordinate::new(33.0, -84.0),
            }],
            monitor_polled_cachegroups: Assignment::new(),
        }
    }

    #[test]
    fn test_merge_resolves_monitor_coordinates() {
        let topo = Topology::from_parts(&snapshot(), &monitoring());

        let tm0 = &topo.monitors["tm0"];
        assert_eq!(tm0.base_url, "http://10.0.0.1:8080");
        assert!(tm0.coordinate.is_some());
        assert!(tm0.status.participates());

        // tm1's location cache group is unknown to the monitoring metadata.
        let tm1 = &topo.monitors["tm1"];
        assert!(tm1.coordinate.is_none());
        assert!(!tm1.status.participates());
    }

    #[test]
    fn test_required_set_and_group_membership() {
        let topo = Topology::from_parts(&snapshot(), &monitoring());

        let required = topo.required_cache_groups();
        assert_eq!(required.len(), 2);
        assert!(required.contains("cg-nocoord"));

        assert_eq!(topo.caches_in_group("cg-east"), vec!["edge-01".to_string()]);
        assert!(topo.caches_in_group("cg-nocoord").is_empty());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&MonitorStatus::AdminDown).unwrap();
        assert_eq!(json, "\"ADMIN_DOWN\"");
        let back: MonitorStatus = serde_json::from_str("\"REPORTED\"").unwrap();
        assert_eq!(back, MonitorStatus::Reported);
    }
}
