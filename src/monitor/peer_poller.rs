//! Peer polling
//!
//! One task per selected peer, each on its own interval, fetching the
//! peer's claimed cache-group list with a bounded per-request deadline.
//! Results flow over a single bounded channel; if the consumer falls
//! behind, the blocked sends slow every poller down rather than dropping
//! results.

use crate::topology::{CacheGroupName, MonitorName};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// Path peers serve their claim list on.
pub const POLLED_CACHEGROUPS_PATH: &str = "/api/polled-cachegroups";

/// Bound of the shared results channel.
pub const RESULTS_CHANNEL_CAPACITY: usize = 10;

/// What one poll of one peer produced.
#[derive(Debug, Clone)]
pub struct PeerPollResult {
    pub peer: MonitorName,
    pub timestamp: DateTime<Utc>,
    pub outcome: PollOutcome,
}

/// Outcome of a single peer poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The peer answered with its claimed cache groups.
    Claims(Vec<CacheGroupName>),
    /// Request failed, timed out, or the body did not decode.
    Failed(String),
}

/// A peer to poll: its name and the base URL to reach it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    pub name: MonitorName,
    pub base_url: String,
}

struct PollerHandle {
    base_url: String,
    stop: watch::Sender<bool>,
}

/// Owns the per-peer polling tasks. `refresh` reconciles the running set
/// against a new selection: pollers for deselected peers are stopped
/// before their next tick, pollers for newly selected peers are spawned.
pub struct PeerPollManager {
    interval: Duration,
    client: reqwest::Client,
    results: mpsc::Sender<PeerPollResult>,
    pollers: HashMap<MonitorName, PollerHandle>,
}

impl PeerPollManager {
    pub fn new(
        interval: Duration,
        request_timeout: Duration,
        results: mpsc::Sender<PeerPollResult>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            interval,
            client,
            results,
            pollers: HashMap::new(),
        })
    }

    /// Names of the peers currently being polled.
    pub fn polled_peers(&self) -> Vec<MonitorName> {
        self.pollers.keys().cloned().collect()
    }

    /// Reconcile running pollers against a new target set.
    pub fn refresh(&mut self, targets: Vec<PeerTarget>) {
        // Stop pollers for peers no longer selected, or whose address moved.
        let keep: HashMap<&str, &str> = targets
            .iter()
            .map(|t| (t.name.as_str(), t.base_url.as_str()))
            .collect();
        let stale: Vec<MonitorName> = self
            .pollers
            .iter()
            .filter(|(name, handle)| {
                keep.get(name.as_str()) != Some(&handle.base_url.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            debug!(peer = %name, "stopping peer poller");
            if let Some(handle) = self.pollers.remove(&name) {
                let _ = handle.stop.send(true);
            }
        }

        // Spawn pollers for newly selected peers.
        for target in targets {
            if self.pollers.contains_key(&target.name) {
                continue;
            }
            debug!(peer = %target.name, url = %target.base_url, "starting peer poller");
            let (stop, stop_rx) = watch::channel(false);
            let handle = PollerHandle {
                base_url: target.base_url.clone(),
                stop,
            };
            let name = target.name.clone();
            tokio::spawn(poll_peer(
                target,
                self.interval,
                self.client.clone(),
                self.results.clone(),
                stop_rx,
            ));
            self.pollers.insert(name, handle);
        }
    }

    /// Stop every poller. The manager can keep being used; `refresh` will
    /// spawn new pollers.
    pub fn stop(&mut self) {
        for (_, handle) in self.pollers.drain() {
            let _ = handle.stop.send(true);
        }
    }
}

impl Drop for PeerPollManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_peer(
    target: PeerTarget,
    interval: Duration,
    client: reqwest::Client,
    results: mpsc::Sender<PeerPollResult>,
    mut stop: watch::Receiver<bool>,
) {
    let url = format!("{}{}", target.base_url, POLLED_CACHEGROUPS_PATH);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately so a fresh selection gets data
    // without waiting out a full interval.

    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = ticker.tick() => {}
        }

        let outcome = match fetch_claims(&client, &url).await {
            Ok(claims) => PollOutcome::Claims(claims),
            Err(e) => PollOutcome::Failed(e.to_string()),
        };
        let result = PeerPollResult {
            peer: target.name.clone(),
            timestamp: Utc::now(),
            outcome,
        };

        // Bounded send: block here if the consumer is behind, unless we are
        // being stopped.
        tokio::select! {
            _ = stop.changed() => return,
            sent = results.send(result) => {
                if sent.is_err() {
                    error!(peer = %target.name, "peer poll results channel closed");
                    return;
                }
            }
        }
    }
}

async fn fetch_claims(client: &reqwest::Client, url: &str) -> Result<Vec<CacheGroupName>> {
    let claims = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<CacheGroupName>>()
        .await?;
    Ok(claims)
}
