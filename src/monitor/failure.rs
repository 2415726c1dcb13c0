//! Peer failure detection
//!
//! Classifies polled peers as live or dead from poll outcomes. A dead
//! classification never mutates the assignment map directly; the planner
//! defers to the authoritative upstream status for removals and only uses
//! this view to waive the steal margin for unresponsive owners.

use crate::monitor::planner::PeerLiveness;
use crate::topology::MonitorName;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a dead classification stands without fresh failure evidence.
/// Once it lapses the peer is presumed live again, gets re-selected, and
/// the next polls re-verify it either way.
pub const DEAD_STATE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
struct PeerHealth {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl PeerHealth {
    fn dead(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
            && self
                .last_failure
                .is_some_and(|at| at.elapsed() < DEAD_STATE_TTL)
    }
}

/// Serializable per-peer view for the `/publish/peerstates` surface.
#[derive(Debug, Clone, Serialize)]
pub struct PeerState {
    pub live: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Tracks consecutive poll failures per polled peer.
pub struct FailureDetector {
    threshold: u32,
    peers: DashMap<MonitorName, PeerHealth>,
}

impl FailureDetector {
    /// `threshold` consecutive failures classify a peer dead. A threshold
    /// of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            peers: DashMap::new(),
        }
    }

    /// Record a successful poll; revives a dead peer.
    pub fn record_success(&self, peer: &str, at: DateTime<Utc>) {
        let mut entry = self.peers.entry(peer.to_string()).or_default();
        if entry.dead(self.threshold) {
            info!(peer = %peer, "peer recovered");
        }
        entry.consecutive_failures = 0;
        entry.last_failure = None;
        entry.last_success = Some(at);
        entry.last_error = None;
    }

    /// Record a failed poll. Returns true when this failure crossed the
    /// dead threshold, so the caller can trigger an immediate replan.
    pub fn record_failure(&self, peer: &str, reason: &str) -> bool {
        let mut entry = self.peers.entry(peer.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Instant::now());
        entry.last_error = Some(reason.to_string());

        let newly_dead = entry.consecutive_failures == self.threshold;
        if newly_dead {
            warn!(
                peer = %peer,
                failures = entry.consecutive_failures,
                reason,
                "classifying peer dead"
            );
        }
        newly_dead
    }

    /// Drop state for a peer that left the topology entirely.
    pub fn forget(&self, peer: &str) {
        self.peers.remove(peer);
    }

    /// Retain state only for peers still in the topology. Deselected peers
    /// keep their state so a dead classification survives until it ages
    /// out, not just until the next selection pass.
    pub fn retain(&self, known: &[MonitorName]) {
        self.peers.retain(|name, _| known.iter().any(|p| p == name));
    }

    /// Current per-peer view.
    pub fn states(&self) -> std::collections::BTreeMap<MonitorName, PeerState> {
        self.peers
            .iter()
            .map(|entry| {
                let health = entry.value();
                (
                    entry.key().clone(),
                    PeerState {
                        live: !health.dead(self.threshold),
                        consecutive_failures: health.consecutive_failures,
                        last_success: health.last_success,
                        last_error: health.last_error.clone(),
                    },
                )
            })
            .collect()
    }
}

impl PeerLiveness for FailureDetector {
    fn is_dead(&self, peer: &str) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|health| health.dead(self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_after_threshold_consecutive_failures() {
        let detector = FailureDetector::new(3);

        assert!(!detector.record_failure("tm1", "timeout"));
        assert!(!detector.record_failure("tm1", "timeout"));
        assert!(!detector.is_dead("tm1"));

        // Third consecutive failure crosses the threshold, exactly once.
        assert!(detector.record_failure("tm1", "timeout"));
        assert!(detector.is_dead("tm1"));
        assert!(!detector.record_failure("tm1", "timeout"));
    }

    #[test]
    fn test_success_resets_the_streak() {
        let detector = FailureDetector::new(2);

        detector.record_failure("tm1", "connection refused");
        detector.record_success("tm1", Utc::now());
        detector.record_failure("tm1", "connection refused");
        assert!(!detector.is_dead("tm1"));
    }

    #[test]
    fn test_unpolled_peers_are_presumed_live() {
        let detector = FailureDetector::new(2);
        assert!(!detector.is_dead("never-polled"));

        detector.record_failure("tm1", "timeout");
        detector.record_failure("tm1", "timeout");
        assert!(detector.is_dead("tm1"));

        detector.forget("tm1");
        assert!(!detector.is_dead("tm1"));
    }

    #[test]
    fn test_retain_prunes_departed_peers() {
        let detector = FailureDetector::new(1);
        detector.record_failure("tm1", "timeout");
        detector.record_failure("tm2", "timeout");

        detector.retain(&["tm2".to_string()]);
        assert!(!detector.is_dead("tm1"));
        assert!(detector.is_dead("tm2"));
    }
}
