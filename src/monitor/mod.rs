//! The monitor process
//!
//! Wires the self-assignment control loop together: a topology-poll loop
//! that plans inline and publishes claim changes, a peer-poll manager with
//! one task per selected peer, a results consumer driving the failure
//! detector, a local health poller, and the read-only HTTP surface. Each
//! piece of shared state sits behind its own read-write section.

pub mod api;
pub mod failure;
pub mod health;
pub mod peer_poller;
pub mod planner;
pub mod selector;
pub mod store;

pub use failure::FailureDetector;
pub use health::{AssumeReachable, ReachabilityProbe};
pub use peer_poller::{PeerPollManager, PeerPollResult, PeerTarget, PollOutcome};
pub use planner::{AllPeersLive, PeerLiveness, PlanOutcome, PlannerConfig};
pub use store::{CgDataStore, CgSnapshot, SnapshotSource};

use crate::config::MonitorConfig;
use crate::registry::RegistryClient;
use crate::topology::{Assignment, CacheGroupName, MonitorName, Topology};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a polled peer last reported claiming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerData {
    pub polled_cache_groups: Vec<CacheGroupName>,
}

/// Shared state of one monitor. Independent read-write sections per value;
/// writers take the exclusive side only for the publish step.
pub struct MonitorState {
    pub config: MonitorConfig,
    /// Last good topology snapshot.
    pub topology: RwLock<Option<Topology>>,
    /// Cached copy of the fleet assignment map.
    pub assignment: RwLock<Assignment>,
    /// Latest claim list received from each polled peer.
    pub peer_data: RwLock<BTreeMap<MonitorName, PeerData>>,
    /// Current peer selection: peer → cache groups polled through it.
    pub selected_peers: RwLock<BTreeMap<MonitorName, BTreeSet<CacheGroupName>>>,
    /// Latest snapshot per cache group.
    pub store: CgDataStore,
    pub failures: FailureDetector,
    /// Nudged when the failure detector classifies a peer dead.
    replan: Notify,
}

impl MonitorState {
    fn new(config: MonitorConfig) -> Self {
        let threshold = config.peer_failure_threshold;
        Self {
            config,
            topology: RwLock::new(None),
            assignment: RwLock::new(Assignment::new()),
            peer_data: RwLock::new(BTreeMap::new()),
            selected_peers: RwLock::new(BTreeMap::new()),
            store: CgDataStore::new(),
            failures: FailureDetector::new(threshold),
            replan: Notify::new(),
        }
    }

    /// The cache groups this monitor currently claims.
    pub async fn owned_cache_groups(&self) -> Vec<CacheGroupName> {
        self.assignment
            .read()
            .await
            .get(&self.config.name)
            .cloned()
            .unwrap_or_default()
    }
}

/// A running monitor.
pub struct Monitor {
    state: Arc<MonitorState>,
    registry: RegistryClient,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Start a monitor with the stub reachability probe.
    pub async fn start(config: MonitorConfig) -> Result<Self> {
        Self::start_with_probe(config, Arc::new(AssumeReachable)).await
    }

    /// Start all monitor tasks and bind the local HTTP surface.
    pub async fn start_with_probe(
        config: MonitorConfig,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self> {
        let registry = RegistryClient::new(&config.registry_url, config.topology_poll_interval)?;
        let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(MonitorState::new(config));
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        // Local HTTP surface, drained gracefully on stop.
        let app = api::router(state.clone());
        let mut server_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            });
            if let Err(e) = serve.await {
                error!("local service error: {e}");
            }
        }));

        // Peer poll results: bounded channel, single consumer.
        let (results_tx, results_rx) =
            mpsc::channel(peer_poller::RESULTS_CHANNEL_CAPACITY);
        let manager = PeerPollManager::new(
            state.config.peer_poll_interval,
            state.config.peer_poll_timeout,
            results_tx,
        )?;
        tasks.push(tokio::spawn(run_results_consumer(
            state.clone(),
            results_rx,
        )));

        // Topology poll loop; the planner runs inline and owns the manager.
        tasks.push(tokio::spawn(run_topology_loop(
            state.clone(),
            registry.clone(),
            manager,
            shutdown.subscribe(),
        )));

        tasks.push(tokio::spawn(health::run(
            state.clone(),
            probe,
            shutdown.subscribe(),
        )));

        info!(
            monitor = %state.config.name,
            addr = %local_addr,
            registry = %state.config.registry_url,
            "monitor started"
        );

        Ok(Self {
            state,
            registry,
            local_addr,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<MonitorState> {
        self.state.clone()
    }

    /// Graceful stop: exit the loops, cancel peer pollers, drain the HTTP
    /// server, then clear this monitor's registry entry.
    pub async fn stop(mut self) {
        info!(monitor = %self.state.config.name, "monitor stopping");
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        let mut clear = Assignment::new();
        clear.insert(self.state.config.name.clone(), Vec::new());
        if let Err(e) = self.registry.update_assignment(&clear).await {
            warn!(
                monitor = %self.state.config.name,
                "failed to clear registry entry on stop: {e}"
            );
        }
    }
}

async fn run_topology_loop(
    state: Arc<MonitorState>,
    registry: RegistryClient,
    mut manager: PeerPollManager,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(state.config.topology_poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = state.replan.notified() => {
                debug!("replanning early: a polled peer was classified dead");
            }
        }
        poll_and_plan(&state, &registry, &mut manager).await;
    }

    manager.stop();
}

/// One full cycle: fetch topology + assignment, plan, publish the delta,
/// then recompute which peers to poll.
async fn poll_and_plan(
    state: &Arc<MonitorState>,
    registry: &RegistryClient,
    manager: &mut PeerPollManager,
) {
    let self_name = state.config.name.clone();

    // Fetch both registry views; on failure keep the last good snapshot and
    // retry next tick.
    let (snapshot, monitoring) =
        match tokio::try_join!(registry.fetch_snapshot(), registry.fetch_monitoring()) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "topology poll failed; keeping last good snapshot");
                return;
            }
        };

    let topology = Topology::from_parts(&snapshot, &monitoring);
    let mut assignment = monitoring.monitor_polled_cachegroups;

    state.store.retain(&topology.required_cache_groups());
    *state.topology.write().await = Some(topology.clone());
    *state.assignment.write().await = assignment.clone();

    // Plan inline against the fresh snapshot.
    let planner_config = PlannerConfig {
        near_km: state.config.near_km,
        min_steal: state.config.min_steal,
    };
    let outcome = match planner::plan(
        &self_name,
        &topology,
        &assignment,
        &state.failures,
        &planner_config,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "skipping planning cycle");
            return;
        }
    };

    if let Some(update) = outcome.update {
        match registry.update_assignment(&update).await {
            Ok(()) => {
                // Fold our own POST into the cached copy rather than waiting
                // for the next poll; the registry's copy still wins then.
                let mut cached = state.assignment.write().await;
                for (monitor, cache_groups) in update {
                    if cache_groups.is_empty() {
                        cached.remove(&monitor);
                    } else {
                        cached.insert(monitor, cache_groups);
                    }
                }
                assignment = cached.clone();
            }
            Err(e) => {
                warn!(error = %e, "assignment update rejected; will recompute next cycle");
            }
        }
    }

    // Re-derive the peer fan-in from the (possibly updated) assignment.
    let claims = selector::peer_claims(&assignment, &self_name);
    let selection = selector::select_peers(&claims);

    let targets: Vec<PeerTarget> = selection
        .keys()
        .filter_map(|peer| match topology.monitors.get(peer) {
            Some(entry) => Some(PeerTarget {
                name: peer.clone(),
                base_url: entry.base_url.clone(),
            }),
            None => {
                // The selection came from the assignment map, so a missing
                // peer means topology and assignment disagree; the next
                // planning cycle clears it.
                error!(peer = %peer, "selected peer missing from topology");
                None
            }
        })
        .collect();

    // Failure state lives as long as the peer is in the topology, so a dead
    // classification survives deselection until it ages out.
    let known: Vec<MonitorName> = topology.monitors.keys().cloned().collect();
    state.failures.retain(&known);
    {
        let mut peer_data = state.peer_data.write().await;
        peer_data.retain(|name, _| selection.contains_key(name));
    }
    *state.selected_peers.write().await = selection;
    manager.refresh(targets);
}

/// Single consumer of the peer-poll results channel.
async fn run_results_consumer(
    state: Arc<MonitorState>,
    mut results: mpsc::Receiver<PeerPollResult>,
) {
    while let Some(result) = results.recv().await {
        match result.outcome {
            PollOutcome::Claims(claims) => {
                state.failures.record_success(&result.peer, result.timestamp);

                let wanted = state
                    .selected_peers
                    .read()
                    .await
                    .get(&result.peer)
                    .cloned()
                    .unwrap_or_default();

                for cache_group in claims.iter().filter(|cg| wanted.contains(*cg)) {
                    state.store.publish(CgSnapshot {
                        cache_group: cache_group.clone(),
                        caches: BTreeMap::new(),
                        timestamp: result.timestamp,
                        source: SnapshotSource::Peer(result.peer.clone()),
                    });
                }

                debug!(
                    peer = %result.peer,
                    claims = claims.len(),
                    "peer poll result"
                );
                let mut peer_data = state.peer_data.write().await;
                peer_data.insert(
                    result.peer,
                    PeerData {
                        polled_cache_groups: claims,
                    },
                );
            }
            PollOutcome::Failed(reason) => {
                warn!(peer = %result.peer, reason = %reason, "peer poll failed");
                if state.failures.record_failure(&result.peer, &reason) {
                    state.replan.notify_one();
                }
            }
        }
    }
}
