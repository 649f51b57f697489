//! Confirmation-aware cache lifetimes.
//!
//! Blocks and confirmed transactions become effectively immutable as they
//! sink below the tip, so their TTL grows with confirmation depth:
//!
//! | Confirmations | TTL    |
//! |---------------|--------|
//! | 0             | 2 s    |
//! | 1–5           | 30 s   |
//! | 6–100         | 600 s  |
//! | > 100         | 3600 s |
//!
//! Everything else uses a fixed band.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kinds of cache-backed entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Block,
    ConfirmedTransaction,
    UnconfirmedTransaction,
    MempoolSummary,
    FeeEstimates,
    AddressSummary,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::ConfirmedTransaction => "confirmedTransaction",
            Self::UnconfirmedTransaction => "unconfirmedTransaction",
            Self::MempoolSummary => "mempoolSummary",
            Self::FeeEstimates => "feeEstimates",
            Self::AddressSummary => "addressSummary",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "confirmedTransaction" | "tx" => Ok(Self::ConfirmedTransaction),
            "unconfirmedTransaction" | "mempoolTx" => Ok(Self::UnconfirmedTransaction),
            "mempoolSummary" => Ok(Self::MempoolSummary),
            "feeEstimates" => Ok(Self::FeeEstimates),
            "addressSummary" => Ok(Self::AddressSummary),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// TTL in seconds for an entity at the given confirmation depth.
///
/// `confirmations` is ignored for kinds that are not confirmation-sensitive.
pub fn ttl_seconds(kind: EntityKind, confirmations: u64) -> u64 {
    match kind {
        EntityKind::Block | EntityKind::ConfirmedTransaction => match confirmations {
            0 => 2,
            1..=5 => 30,
            6..=100 => 600,
            _ => 3600,
        },
        EntityKind::MempoolSummary => 3,
        EntityKind::FeeEstimates => 15,
        EntityKind::AddressSummary => 45,
        EntityKind::UnconfirmedTransaction => 3,
    }
}

/// [`ttl_seconds`] as a `Duration`.
pub fn ttl_for(kind: EntityKind, confirmations: u64) -> Duration {
    Duration::from_secs(ttl_seconds(kind, confirmations))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bands() {
        assert_eq!(ttl_seconds(EntityKind::MempoolSummary, 0), 3);
        assert_eq!(ttl_seconds(EntityKind::FeeEstimates, 0), 15);
        assert_eq!(ttl_seconds(EntityKind::AddressSummary, 0), 45);
        assert_eq!(ttl_seconds(EntityKind::UnconfirmedTransaction, 0), 3);
        // Confirmations do not move fixed bands.
        assert_eq!(ttl_seconds(EntityKind::MempoolSummary, 500), 3);
    }

    #[test]
    fn block_bands_follow_confirmation_depth() {
        assert_eq!(ttl_seconds(EntityKind::Block, 0), 2);
        assert_eq!(ttl_seconds(EntityKind::Block, 1), 30);
        assert_eq!(ttl_seconds(EntityKind::Block, 5), 30);
        assert_eq!(ttl_seconds(EntityKind::Block, 6), 600);
        assert_eq!(ttl_seconds(EntityKind::Block, 10), 600);
        assert_eq!(ttl_seconds(EntityKind::Block, 100), 600);
        assert_eq!(ttl_seconds(EntityKind::Block, 101), 3600);
        assert_eq!(ttl_seconds(EntityKind::Block, 200), 3600);
    }

    #[test]
    fn confirmed_transactions_share_block_bands() {
        for conf in [0, 3, 50, 1_000] {
            assert_eq!(
                ttl_seconds(EntityKind::ConfirmedTransaction, conf),
                ttl_seconds(EntityKind::Block, conf)
            );
        }
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!("mempoolSummary".parse::<EntityKind>(), Ok(EntityKind::MempoolSummary));
        assert_eq!("block".parse::<EntityKind>(), Ok(EntityKind::Block));
        assert!("utxo".parse::<EntityKind>().is_err());
        assert_eq!(ttl_for(EntityKind::FeeEstimates, 0), Duration::from_secs(15));
    }
}
