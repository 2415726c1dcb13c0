//! Peer selection for non-locally-owned cache groups
//!
//! Choosing the fewest peers whose claims cover every cache group we do not
//! poll ourselves is Set-Cover, so the selection uses the standard greedy
//! heuristic: repeatedly take the peer covering the most still-uncovered
//! groups. The cover is within an O(ln n) factor of optimal, which is
//! plenty for a polling fan-in.

use crate::topology::{Assignment, CacheGroupName, MonitorName};
use std::collections::{BTreeMap, BTreeSet};

/// The per-peer claim sets a monitor selects over: the fleet assignment
/// with self removed and self's own cache groups subtracted from every
/// peer's set.
pub fn peer_claims(
    assignment: &Assignment,
    self_name: &str,
) -> BTreeMap<MonitorName, BTreeSet<CacheGroupName>> {
    let own: BTreeSet<&str> = assignment
        .get(self_name)
        .map(|cgs| cgs.iter().map(String::as_str).collect())
        .unwrap_or_default();

    assignment
        .iter()
        .filter(|(name, _)| name.as_str() != self_name)
        .map(|(name, cgs)| {
            let remaining = cgs
                .iter()
                .filter(|cg| !own.contains(cg.as_str()))
                .cloned()
                .collect();
            (name.clone(), remaining)
        })
        .collect()
}

/// Pick a minimal-ish set of peers covering every cache group in the union
/// of `claims`, mapping each selected peer to the groups it is polled for.
///
/// Ties on coverage break toward the lexicographically smaller monitor
/// name, so all monitors derive the same selection from the same claims.
pub fn select_peers(
    claims: &BTreeMap<MonitorName, BTreeSet<CacheGroupName>>,
) -> BTreeMap<MonitorName, BTreeSet<CacheGroupName>> {
    let mut uncovered: BTreeSet<CacheGroupName> =
        claims.values().flatten().cloned().collect();

    let mut selected = BTreeMap::new();
    while !uncovered.is_empty() {
        let best = claims
            .iter()
            .filter(|(peer, _)| !selected.contains_key(*peer))
            .map(|(peer, cgs)| (peer, cgs.intersection(&uncovered).count()))
            .filter(|(_, covered)| *covered > 0)
            // Inverted name comparison: on equal coverage the smaller
            // monitor name is the maximum.
            .max_by(|(a_peer, a_count), (b_peer, b_count)| {
                a_count.cmp(b_count).then(b_peer.cmp(a_peer))
            });

        let Some((peer, _)) = best else {
            break; // cannot happen while uncovered ⊆ union of claims
        };

        let covered: BTreeSet<CacheGroupName> = claims[peer]
            .intersection(&uncovered)
            .cloned()
            .collect();
        for cg in &covered {
            uncovered.remove(cg);
        }
        selected.insert(peer.clone(), covered);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(
        entries: &[(&str, &[&str])],
    ) -> BTreeMap<MonitorName, BTreeSet<CacheGroupName>> {
        entries
            .iter()
            .map(|(peer, cgs)| {
                (
                    peer.to_string(),
                    cgs.iter().map(|cg| cg.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_greedy_picks_largest_cover_first() {
        let claims = claims(&[
            ("A", &["cg1", "cg2", "cg3"]),
            ("B", &["cg3", "cg4"]),
            ("C", &["cg1", "cg4"]),
        ]);

        let selected = select_peers(&claims);

        assert_eq!(selected.len(), 2);
        assert_eq!(
            selected["A"],
            ["cg1", "cg2", "cg3"].map(String::from).into_iter().collect()
        );
        assert_eq!(selected["B"], ["cg4"].map(String::from).into_iter().collect());
        assert!(!selected.contains_key("C"));
    }

    #[test]
    fn test_selection_is_a_cover() {
        let claims = claims(&[
            ("A", &["cg1", "cg5"]),
            ("B", &["cg2", "cg3"]),
            ("C", &["cg4"]),
            ("D", &["cg1", "cg2", "cg3", "cg4"]),
        ]);

        let union: BTreeSet<_> = claims.values().flatten().cloned().collect();
        let selected = select_peers(&claims);
        let covered: BTreeSet<_> = selected.values().flatten().cloned().collect();
        assert_eq!(covered, union);
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let claims = claims(&[("B", &["cg1"]), ("A", &["cg1"])]);
        let selected = select_peers(&claims);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("A"));
    }

    #[test]
    fn test_empty_claims_select_nothing() {
        let claims = claims(&[("A", &[])]);
        assert!(select_peers(&claims).is_empty());
    }

    #[test]
    fn test_peer_claims_subtracts_own_groups() {
        let mut assignment = Assignment::new();
        assignment.insert("self".to_string(), vec!["cg1".to_string(), "cg2".to_string()]);
        assignment.insert(
            "peer".to_string(),
            vec!["cg1".to_string(), "cg3".to_string()],
        );

        let claims = peer_claims(&assignment, "self");
        assert!(!claims.contains_key("self"));
        assert_eq!(
            claims["peer"],
            ["cg3"].map(String::from).into_iter().collect()
        );
    }
}
