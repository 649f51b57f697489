//! Polling engine and hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timer intervals and per-call limits for the polling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub tip_interval_ms: u64,
    pub fees_interval_ms: u64,
    pub mempool_interval_ms: u64,
    pub price_interval_ms: u64,
    pub fx_interval_ms: u64,
    pub blockchain_info_interval_ms: u64,
    pub network_info_interval_ms: u64,
    pub mining_info_interval_ms: u64,
    /// Upper bound on any single upstream call made by a tick.
    pub call_timeout_ms: u64,
    /// Header hex characters kept as the tip fingerprint. 136 covers
    /// version, previous hash and merkle root, so sibling blocks differ.
    pub fingerprint_len: usize,
    /// Minimum interval between failure log lines per poll task.
    pub failure_log_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tip_interval_ms: 5_000,
            fees_interval_ms: 15_000,
            mempool_interval_ms: 10_000,
            price_interval_ms: 45_000,
            fx_interval_ms: 3_600_000,
            blockchain_info_interval_ms: 30_000,
            network_info_interval_ms: 60_000,
            mining_info_interval_ms: 120_000,
            call_timeout_ms: 10_000,
            fingerprint_len: 136,
            failure_log_interval_ms: 60_000,
        }
    }
}

impl PollingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn failure_log_interval(&self) -> Duration {
        Duration::from_millis(self.failure_log_interval_ms)
    }

    /// Names of interval fields that are zero.
    pub fn zero_intervals(&self) -> Vec<&'static str> {
        [
            ("tip_interval_ms", self.tip_interval_ms),
            ("fees_interval_ms", self.fees_interval_ms),
            ("mempool_interval_ms", self.mempool_interval_ms),
            ("price_interval_ms", self.price_interval_ms),
            ("fx_interval_ms", self.fx_interval_ms),
            ("blockchain_info_interval_ms", self.blockchain_info_interval_ms),
            ("network_info_interval_ms", self.network_info_interval_ms),
            ("mining_info_interval_ms", self.mining_info_interval_ms),
            ("call_timeout_ms", self.call_timeout_ms),
        ]
        .into_iter()
        .filter(|(_, v)| *v == 0)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Transport-facing hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Buffered messages per channel subscriber before deliveries fail.
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}
