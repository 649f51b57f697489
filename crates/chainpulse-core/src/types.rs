//! Shared chain, fee, mempool and health types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── ChainTip ─────────────────────────────────────────────────────────────────

/// Raw tip header as reported by an upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipHeader {
    /// Block height of the tip.
    pub height: u64,
    /// Serialized block header, hex encoded.
    pub header_hex: String,
}

/// The most recent block height plus a cheap identity fingerprint.
///
/// The fingerprint is a prefix of the raw header hex, not a block hash. It
/// only needs to change when the block at a height changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTip {
    pub height: u64,
    pub fingerprint: String,
}

impl ChainTip {
    pub fn new(height: u64, fingerprint: impl Into<String>) -> Self {
        Self {
            height,
            fingerprint: fingerprint.into(),
        }
    }

    /// Build a tip from a raw header, keeping the first `len` hex characters.
    pub fn from_header(header: &TipHeader, len: usize) -> Self {
        Self {
            height: header.height,
            fingerprint: header.header_hex.chars().take(len).collect(),
        }
    }
}

// ─── ReorgEvent ───────────────────────────────────────────────────────────────

/// A tip change that is not a simple height increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorgEvent {
    /// Approximate depth: `abs(previous.height - new.height)`. Only two tip
    /// observations are available, so the common ancestor is unknown.
    pub depth: u32,
    pub previous_tip: ChainTip,
    pub new_tip: ChainTip,
}

impl ReorgEvent {
    pub fn between(previous_tip: ChainTip, new_tip: ChainTip) -> Self {
        let depth = u32::try_from(previous_tip.height.abs_diff(new_tip.height)).unwrap_or(u32::MAX);
        Self {
            depth,
            previous_tip,
            new_tip,
        }
    }
}

// ─── Fees & mempool ───────────────────────────────────────────────────────────

/// Fee rate tiers in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub fast: f64,
    pub normal: f64,
    pub slow: f64,
}

/// Pending transaction figures for a mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolSummary {
    pub pending_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsize_bytes: Option<u64>,
}

// ─── Cache-sourced snapshots ──────────────────────────────────────────────────

/// Latest spot price, written into the shared cache by an external feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub value: f64,
    pub as_of_millis: i64,
    pub provider_name: String,
}

/// Latest fiat exchange rates keyed by currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxSnapshot {
    pub rates: BTreeMap<String, f64>,
    pub as_of_millis: i64,
    pub provider_name: String,
}

// ─── Health ───────────────────────────────────────────────────────────────────

/// Coarse liveness of an upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Result of the most recent health probe against one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthState,
    pub response_time_ms: u64,
    pub last_check_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
