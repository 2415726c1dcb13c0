//! Environment-based configuration
//!
//! Planning parameters are consumed from the environment rather than the
//! CLI so that every monitor in a CDN runs with the same values; monitors
//! with different NEAR_KM or MIN_STEAL thresholds would flap assignments
//! between each other. Invalid values are fatal at startup.

use crate::topology::MonitorName;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Near/far classification threshold, in kilometers. About a quarter the
/// width of the US.
pub const DEFAULT_NEAR_KM: f64 = 1000.0;
/// Minimum load delta, in cache groups, before stealing from a peer.
pub const DEFAULT_MIN_STEAL: usize = 1;
/// Consecutive peer-poll failures before a peer is classified dead.
pub const DEFAULT_PEER_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_TOPOLOGY_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_PEER_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_PEER_POLL_TIMEOUT_SECS: u64 = 3;
const DEFAULT_HEALTH_POLL_INTERVAL_SECS: u64 = 3;

/// Full configuration of one monitor process.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// This monitor's stable name; must match its snapshot entry.
    pub name: MonitorName,
    /// Base URL of the shared registry.
    pub registry_url: String,
    /// Address the local HTTP surface binds to.
    pub listen_addr: SocketAddr,
    /// Near/far threshold in kilometers.
    pub near_km: f64,
    /// Minimum load delta (in cache groups) before stealing.
    pub min_steal: usize,
    /// Interval between topology polls (the planner runs inline).
    pub topology_poll_interval: Duration,
    /// Interval between polls of each selected peer.
    pub peer_poll_interval: Duration,
    /// Per-request deadline for peer polls.
    pub peer_poll_timeout: Duration,
    /// Consecutive failures before a peer is classified dead.
    pub peer_failure_threshold: u32,
    /// Interval between local health snapshots of owned cache groups.
    pub health_poll_interval: Duration,
}

impl MonitorConfig {
    /// Build a config from identity plus `CACHEWATCH_*` environment
    /// variables:
    ///
    /// - `CACHEWATCH_NEAR_KM`: float, kilometers (default 1000)
    /// - `CACHEWATCH_MIN_STEAL`: integer cache groups (default 1)
    /// - `CACHEWATCH_TOPOLOGY_POLL_INTERVAL_SECS` (default 3)
    /// - `CACHEWATCH_PEER_POLL_INTERVAL_SECS` (default 3)
    /// - `CACHEWATCH_PEER_POLL_TIMEOUT_SECS` (default 3)
    /// - `CACHEWATCH_PEER_FAILURE_THRESHOLD` (default 3)
    pub fn from_env(
        name: MonitorName,
        registry_url: String,
        listen_addr: SocketAddr,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Config("monitor name cannot be empty".to_string()));
        }
        if registry_url.trim().is_empty() {
            return Err(Error::Config("registry URL cannot be empty".to_string()));
        }

        let near_km = env_f64("CACHEWATCH_NEAR_KM", DEFAULT_NEAR_KM)?;
        if near_km <= 0.0 || !near_km.is_finite() {
            return Err(Error::Config(format!(
                "CACHEWATCH_NEAR_KM must be a positive distance, got {near_km}"
            )));
        }

        Ok(Self {
            name,
            registry_url,
            listen_addr,
            near_km,
            min_steal: env_usize("CACHEWATCH_MIN_STEAL", DEFAULT_MIN_STEAL)?,
            topology_poll_interval: env_duration_secs(
                "CACHEWATCH_TOPOLOGY_POLL_INTERVAL_SECS",
                DEFAULT_TOPOLOGY_POLL_INTERVAL_SECS,
            )?,
            peer_poll_interval: env_duration_secs(
                "CACHEWATCH_PEER_POLL_INTERVAL_SECS",
                DEFAULT_PEER_POLL_INTERVAL_SECS,
            )?,
            peer_poll_timeout: env_duration_secs(
                "CACHEWATCH_PEER_POLL_TIMEOUT_SECS",
                DEFAULT_PEER_POLL_TIMEOUT_SECS,
            )?,
            peer_failure_threshold: env_u32(
                "CACHEWATCH_PEER_FAILURE_THRESHOLD",
                DEFAULT_PEER_FAILURE_THRESHOLD,
            )?,
            health_poll_interval: env_duration_secs(
                "CACHEWATCH_HEALTH_POLL_INTERVAL_SECS",
                DEFAULT_HEALTH_POLL_INTERVAL_SECS,
            )?,
        })
    }
}

fn env_f64(name: &str, default: f64) -> Result<f64> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::Config(format!("{name} must be a float: {e}"))),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::Config(format!("{name} must be a non-negative integer: {e}"))),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("{name} must be a non-negative integer: {e}"))),
    }
}

fn env_duration_secs(name: &str, default_secs: u64) -> Result<Duration> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_secs(default_secs)),
        Ok(raw) => {
            let secs = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| Error::Config(format!("{name} must be a duration in seconds: {e}")))?;
            if secs <= 0.0 || !secs.is_finite() {
                return Err(Error::Config(format!(
                    "{name} must be a positive duration in seconds, got '{raw}'"
                )));
            }
            Ok(Duration::from_secs_f64(secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::{Mutex, OnceLock};

    const TEST_ENV_KEYS: &[&str] = &[
        "CACHEWATCH_NEAR_KM",
        "CACHEWATCH_MIN_STEAL",
        "CACHEWATCH_TOPOLOGY_POLL_INTERVAL_SECS",
        "CACHEWATCH_PEER_POLL_INTERVAL_SECS",
        "CACHEWATCH_PEER_POLL_TIMEOUT_SECS",
        "CACHEWATCH_PEER_FAILURE_THRESHOLD",
        "CACHEWATCH_HEALTH_POLL_INTERVAL_SECS",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env<F>(overrides: &[(&str, &str)], f: F)
    where
        F: FnOnce(),
    {
        let _guard = env_lock().lock().expect("env lock poisoned");
        let mut saved: Vec<(&str, Option<OsString>)> = Vec::new();

        for key in TEST_ENV_KEYS {
            saved.push((key, std::env::var_os(key)));
            std::env::remove_var(key);
        }
        for (key, value) in overrides {
            std::env::set_var(key, value);
        }

        f();

        for (key, value) in saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }

    fn base() -> (MonitorName, String, SocketAddr) {
        (
            "tm0".to_string(),
            "http://127.0.0.1:19999".to_string(),
            "127.0.0.1:0".parse().unwrap(),
        )
    }

    #[test]
    fn from_env_uses_defaults() {
        with_env(&[], || {
            let (name, url, addr) = base();
            let cfg = MonitorConfig::from_env(name, url, addr).unwrap();
            assert_eq!(cfg.near_km, DEFAULT_NEAR_KM);
            assert_eq!(cfg.min_steal, DEFAULT_MIN_STEAL);
            assert_eq!(cfg.topology_poll_interval, Duration::from_secs(3));
            assert_eq!(cfg.peer_failure_threshold, 3);
        });
    }

    #[test]
    fn from_env_reads_overrides() {
        with_env(
            &[
                ("CACHEWATCH_NEAR_KM", "250.5"),
                ("CACHEWATCH_MIN_STEAL", "4"),
                ("CACHEWATCH_PEER_POLL_INTERVAL_SECS", "0.5"),
            ],
            || {
                let (name, url, addr) = base();
                let cfg = MonitorConfig::from_env(name, url, addr).unwrap();
                assert_eq!(cfg.near_km, 250.5);
                assert_eq!(cfg.min_steal, 4);
                assert_eq!(cfg.peer_poll_interval, Duration::from_millis(500));
            },
        );
    }

    #[test]
    fn from_env_rejects_invalid_values() {
        with_env(&[("CACHEWATCH_MIN_STEAL", "lots")], || {
            let (name, url, addr) = base();
            let err = MonitorConfig::from_env(name, url, addr).unwrap_err();
            assert!(err.to_string().contains("CACHEWATCH_MIN_STEAL"));
        });

        with_env(&[("CACHEWATCH_NEAR_KM", "-10")], || {
            let (name, url, addr) = base();
            let err = MonitorConfig::from_env(name, url, addr).unwrap_err();
            assert!(err.to_string().contains("positive distance"));
        });

        with_env(&[("CACHEWATCH_TOPOLOGY_POLL_INTERVAL_SECS", "0")], || {
            let (name, url, addr) = base();
            assert!(MonitorConfig::from_env(name, url, addr).is_err());
        });
    }

    #[test]
    fn from_env_rejects_empty_identity() {
        with_env(&[], || {
            let (_, url, addr) = base();
            assert!(MonitorConfig::from_env("".to_string(), url, addr).is_err());

            let (name, _, addr) = base();
            assert!(MonitorConfig::from_env(name, " ".to_string(), addr).is_err());
        });
    }
}
