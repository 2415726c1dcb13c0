//! Registry HTTP client

use crate::topology::{Assignment, CdnSnapshot, MonitoringConfig};
use crate::{Error, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Client for the shared registry. One per monitor; reused across polls.
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Fetch the CDN snapshot (`GET /snapshot`).
    pub async fn fetch_snapshot(&self) -> Result<CdnSnapshot> {
        let url = format!("{}/snapshot", self.base_url);
        let snapshot = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<CdnSnapshot>()
            .await?;
        Ok(snapshot)
    }

    /// Fetch the monitoring metadata, including the assignment map
    /// (`GET /monitoring.json`).
    pub async fn fetch_monitoring(&self) -> Result<MonitoringConfig> {
        let url = format!("{}/monitoring.json", self.base_url);
        let monitoring = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<MonitoringConfig>()
            .await?;
        Ok(monitoring)
    }

    /// Fetch just the assignment map.
    pub async fn fetch_assignment(&self) -> Result<Assignment> {
        Ok(self.fetch_monitoring().await?.monitor_polled_cachegroups)
    }

    /// POST an assignment delta (`POST /monitor-polled-cachegroups`).
    ///
    /// The registry overwrites each mentioned key; an empty list clears a
    /// monitor. Anything other than 204 is a conflict the caller retries
    /// next planning cycle.
    pub async fn update_assignment(&self, delta: &Assignment) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let url = format!("{}/monitor-polled-cachegroups", self.base_url);
        let response = self.client.post(&url).json(delta).send().await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(Error::Registry {
                status: response.status().as_u16(),
            });
        }
        debug!(monitors = delta.len(), "posted assignment delta");
        Ok(())
    }
}
