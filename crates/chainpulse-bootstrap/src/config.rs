//! Aggregator and health monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Readiness aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// How long a computed snapshot is served from cache.
    pub snapshot_ttl_ms: u64,
    /// Upper bound on each source's data fetch.
    pub data_timeout_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_ms: 5_000,
            data_timeout_ms: 5_000,
        }
    }
}

impl BootstrapConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }
}

/// Background health probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Probes slower than this mark the service `degraded`.
    pub degraded_threshold_ms: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            probe_timeout_ms: 2_000,
            degraded_threshold_ms: 1_000,
        }
    }
}

impl HealthMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
