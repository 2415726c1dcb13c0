//! Self-assignment planning
//!
//! Each planning cycle a monitor decides, from the shared topology and
//! assignment map alone, which cache groups it should poll. Monitors only
//! ever claim work for themselves; the single exception is clearing entries
//! for peers the upstream has marked OFFLINE/ADMIN_DOWN or dropped from the
//! topology entirely. Peer symmetry is encoded through the near/far
//! classification: monitors equidistant to a cache group negotiate solely
//! through the registry, and the MIN_STEAL margin keeps the negotiation
//! from flapping.

use crate::geo::Coordinate;
use crate::topology::{Assignment, CacheGroupName, MonitorName, Topology};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Planning parameters. Must be fleet-wide uniform.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Near/far threshold in kilometers.
    pub near_km: f64,
    /// Minimum load delta, in cache groups, before stealing from an
    /// equidistant peer.
    pub min_steal: usize,
}

/// Liveness view the planner consults before leaving a cache group with an
/// equidistant owner inside the MIN_STEAL margin. A peer classified dead
/// forfeits the margin; upstream status remains the only authority for
/// removing entries.
pub trait PeerLiveness {
    fn is_dead(&self, peer: &str) -> bool;
}

/// Presumes every peer live; used when no poll history exists.
pub struct AllPeersLive;

impl PeerLiveness for AllPeersLive {
    fn is_dead(&self, _peer: &str) -> bool {
        false
    }
}

impl PeerLiveness for BTreeSet<MonitorName> {
    fn is_dead(&self, peer: &str) -> bool {
        self.contains(peer)
    }
}

/// The result of one planning cycle.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Delta to POST to the registry: this monitor's full new list, plus an
    /// empty list per removed peer. `None` when nothing changed.
    pub update: Option<Assignment>,
    /// The planned self-owned set, changed or not.
    pub owned: BTreeSet<CacheGroupName>,
    /// Peers whose entries are being cleared.
    pub removed_peers: Vec<MonitorName>,
}

/// Run one planning cycle.
///
/// Deterministic: cache groups are visited in lexicographic order and
/// equidistant peers in lexicographic monitor-name order, so any two
/// monitors observing the same snapshot compute the same outcome.
pub fn plan(
    self_name: &str,
    topology: &Topology,
    assignment: &Assignment,
    liveness: &dyn PeerLiveness,
    config: &PlannerConfig,
) -> Result<PlanOutcome> {
    let self_entry = topology
        .monitors
        .get(self_name)
        .ok_or_else(|| Error::MonitorNotInTopology(self_name.to_string()))?;
    let self_coord = self_entry
        .coordinate
        .ok_or_else(|| Error::MonitorWithoutCoordinate(self_name.to_string()))?;

    // Step 1: entries to clear. Absent from topology counts as dead.
    let removed_peers: Vec<MonitorName> = assignment
        .keys()
        .filter(|name| name.as_str() != self_name)
        .filter(|name| {
            topology
                .monitors
                .get(*name)
                .map_or(true, |entry| !entry.status.participates())
        })
        .cloned()
        .collect();
    for peer in &removed_peers {
        info!(peer = %peer, "clearing assignment entry for dead peer");
    }

    // Step 2: working copy without the removed peers, so their cache groups
    // are absorbed in this same cycle.
    let mut working: BTreeMap<MonitorName, BTreeSet<CacheGroupName>> = assignment
        .iter()
        .filter(|(name, _)| !removed_peers.contains(*name))
        .map(|(name, cgs)| (name.clone(), cgs.iter().cloned().collect()))
        .collect();
    working.entry(self_name.to_string()).or_default();

    // Peers eligible for equidistance: participating, located, not self.
    let peers: Vec<(&MonitorName, Coordinate)> = topology
        .monitors
        .iter()
        .filter(|(name, entry)| name.as_str() != self_name && entry.status.participates())
        .filter_map(|(name, entry)| {
            if entry.coordinate.is_none() {
                warn!(peer = %name, "peer has no coordinate; excluded from equidistance this cycle");
            }
            entry.coordinate.map(|coord| (name, coord))
        })
        .collect();

    // Step 3: walk the required cache groups.
    for (cg, cg_coord) in &topology.cache_groups {
        let Some(cg_coord) = cg_coord else {
            warn!(cachegroup = %cg, "cache group has no coordinate; excluded from equidistance, claiming locally");
            claim(&mut working, self_name, cg);
            continue;
        };
        let self_near = self_coord.near(cg_coord, config.near_km);

        let mut left_with_peer = false;
        for (peer, peer_coord) in &peers {
            if peer_coord.near(cg_coord, config.near_km) != self_near {
                continue; // not equidistant
            }
            let owns = working.get(peer.as_str()).is_some_and(|set| set.contains(cg));
            if !owns {
                continue;
            }

            let peer_load = working[peer.as_str()].len() as i64;
            let self_load = working[self_name].len() as i64;
            let inside_margin = peer_load - self_load < config.min_steal as i64;

            if inside_margin {
                if !liveness.is_dead(peer.as_str()) {
                    // An equidistant monitor is already handling it without
                    // holding MIN_STEAL more work than us. Drop any tentative
                    // claim made while stealing from an earlier owner.
                    if let Some(set) = working.get_mut(self_name) {
                        set.remove(cg);
                    }
                    left_with_peer = true;
                    break;
                }
                info!(
                    cachegroup = %cg,
                    peer = %peer,
                    "equidistant owner appears dead; waiving steal margin"
                );
            } else {
                info!(
                    cachegroup = %cg,
                    peer = %peer,
                    peer_load,
                    self_load,
                    "stealing cache group from busier equidistant peer"
                );
            }

            // Steal in the working copy so later iterations see the new
            // loads and stealing cannot overshoot the margin.
            if let Some(set) = working.get_mut(peer.as_str()) {
                set.remove(cg);
            }
            claim(&mut working, self_name, cg);
        }

        if !left_with_peer {
            claim(&mut working, self_name, cg);
        }
    }

    // Step 4: diff against the previously published self entry.
    let owned = working.remove(self_name).unwrap_or_default();
    let previous: BTreeSet<CacheGroupName> = assignment
        .get(self_name)
        .map(|cgs| cgs.iter().cloned().collect())
        .unwrap_or_default();

    for added in owned.difference(&previous) {
        debug!(cachegroup = %added, "claiming cache group");
    }
    for dropped in previous.difference(&owned) {
        debug!(cachegroup = %dropped, "relinquishing cache group");
    }

    let changed = owned != previous || !removed_peers.is_empty();
    let update = changed.then(|| {
        let mut delta = Assignment::new();
        delta.insert(self_name.to_string(), owned.iter().cloned().collect());
        for peer in &removed_peers {
            delta.insert(peer.clone(), Vec::new());
        }
        delta
    });

    Ok(PlanOutcome {
        update,
        owned,
        removed_peers,
    })
}

fn claim(
    working: &mut BTreeMap<MonitorName, BTreeSet<CacheGroupName>>,
    self_name: &str,
    cg: &str,
) {
    working
        .entry(self_name.to_string())
        .or_default()
        .insert(cg.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MonitorEntry, MonitorStatus};

    fn entry(lat: f64, lon: f64, status: MonitorStatus) -> MonitorEntry {
        MonitorEntry {
            base_url: "http://127.0.0.1:0".to_string(),
            status,
            coordinate: Some(Coordinate::new(lat, lon)),
        }
    }

    fn config() -> PlannerConfig {
        PlannerConfig {
            near_km: 1000.0,
            min_steal: 1,
        }
    }

    #[test]
    fn test_missing_self_skips_cycle() {
        let topology = Topology::default();
        let err = plan("tm0", &topology, &Assignment::new(), &AllPeersLive, &config()).unwrap_err();
        assert!(matches!(err, Error::MonitorNotInTopology(_)));
    }

    #[test]
    fn test_missing_self_coordinate_skips_cycle() {
        let mut topology = Topology::default();
        topology.monitors.insert(
            "tm0".to_string(),
            MonitorEntry {
                base_url: "http://127.0.0.1:0".to_string(),
                status: MonitorStatus::Online,
                coordinate: None,
            },
        );
        let err = plan("tm0", &topology, &Assignment::new(), &AllPeersLive, &config()).unwrap_err();
        assert!(matches!(err, Error::MonitorWithoutCoordinate(_)));
    }

    #[test]
    fn test_uncoordinated_cache_group_is_claimed_locally() {
        let mut topology = Topology::default();
        topology
            .monitors
            .insert("tm0".to_string(), entry(40.0, -105.0, MonitorStatus::Online));
        topology.cache_groups.insert("cg-mystery".to_string(), None);

        let outcome =
            plan("tm0", &topology, &Assignment::new(), &AllPeersLive, &config()).unwrap();
        assert!(outcome.owned.contains("cg-mystery"));
    }

    #[test]
    fn test_far_monitor_does_not_protect_near_cache_group() {
        // tm0 (near) should claim the cache group even though tm1 (far)
        // already owns it: they are not equidistant.
        let mut topology = Topology::default();
        topology
            .monitors
            .insert("tm0".to_string(), entry(40.0, -105.0, MonitorStatus::Online));
        topology
            .monitors
            .insert("tm1".to_string(), entry(0.0, 100.0, MonitorStatus::Online));
        topology.cache_groups.insert(
            "cg-denver".to_string(),
            Some(Coordinate::new(39.7, -104.9)),
        );

        let mut assignment = Assignment::new();
        assignment.insert("tm1".to_string(), vec!["cg-denver".to_string()]);

        let outcome = plan("tm0", &topology, &assignment, &AllPeersLive, &config()).unwrap();
        assert!(outcome.owned.contains("cg-denver"));
        // tm1 keeps its entry: it is alive, and I3 forbids touching it.
        let update = outcome.update.unwrap();
        assert!(!update.contains_key("tm1"));
    }

    #[test]
    fn test_dead_equidistant_owner_forfeits_margin() {
        let mut topology = Topology::default();
        topology
            .monitors
            .insert("tm0".to_string(), entry(40.0, -105.0, MonitorStatus::Online));
        topology
            .monitors
            .insert("tm1".to_string(), entry(40.1, -105.1, MonitorStatus::Online));
        topology
            .cache_groups
            .insert("cg-a".to_string(), Some(Coordinate::new(39.9, -105.0)));

        let mut assignment = Assignment::new();
        assignment.insert("tm1".to_string(), vec!["cg-a".to_string()]);

        // Alive within the margin: leave the group with tm1.
        let outcome = plan("tm0", &topology, &assignment, &AllPeersLive, &config()).unwrap();
        assert!(!outcome.owned.contains("cg-a"));

        // Same shape, but tm1 has stopped answering peer polls.
        let dead: BTreeSet<MonitorName> = [("tm1".to_string())].into_iter().collect();
        let outcome = plan("tm0", &topology, &assignment, &dead, &config()).unwrap();
        assert!(outcome.owned.contains("cg-a"));
        // The margin waiver claims the group but still does not clear the
        // peer's entry; the upstream status does that.
        assert!(outcome.removed_peers.is_empty());
    }
}
