//! # cachewatch
//!
//! Multi-peer coordination for CDN health monitoring.
//!
//! A fleet of monitor processes autonomously partitions the work of polling
//! cache groups for health, without central assignment. Each monitor plans
//! its own claims from a shared registry snapshot, polls peers for the
//! groups it does not own, and reacts to peer failure and membership
//! change.
//!
//! ## Architecture
//!
//! - **Registry**: small HTTP service with get/merge-set semantics on the
//!   monitor → cache-group-list map, plus the CDN snapshot
//! - **Monitor**: topology poller with an inline self-assignment planner,
//!   greedy set-cover peer selection, per-peer poll tasks, and a read-only
//!   HTTP surface over the in-process snapshot store
//!
//! Coordination never elects a leader: monitors equidistant to a cache
//! group treat each other as equals, and the MIN_STEAL margin keeps claim
//! transfers from flapping.

pub mod config;
pub mod geo;
pub mod monitor;
pub mod registry;
pub mod telemetry;
pub mod topology;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::MonitorConfig;
    pub use crate::geo::{haversine_km, Coordinate};
    pub use crate::monitor::{Monitor, MonitorState, PlannerConfig};
    pub use crate::registry::{RegistryClient, RegistryServer, RegistryState};
    pub use crate::topology::{
        Assignment, CacheGroupName, CdnSnapshot, MonitorName, MonitorStatus, Topology,
    };
    pub use crate::{Error, Result};
}
