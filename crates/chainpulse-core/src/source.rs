//! Upstream source traits — the contract every adapter implements.
//!
//! Adapters are deliberately thin: call a method, decode the result or
//! return a [`SourceError`]. All reliability policy (timeouts, circuit
//! breakers, throttled logging) lives with the caller.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;
use crate::event::{HubEvent, Topic};
use crate::types::{FeeEstimate, MempoolSummary, TipHeader};

/// A chain data source: full-node RPC endpoint or indexer server.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn ChainSource>`.
#[async_trait]
pub trait ChainSource: Send + Sync + 'static {
    /// Stable service name; keys circuit breakers and the health table.
    fn name(&self) -> &str;

    /// Current tip height together with its raw header.
    async fn tip_header(&self) -> Result<TipHeader, SourceError>;

    /// Current tip height only.
    ///
    /// Default implementation derives it from [`tip_header`](Self::tip_header);
    /// override when the upstream has a cheaper call.
    async fn tip_height(&self) -> Result<u64, SourceError> {
        Ok(self.tip_header().await?.height)
    }

    /// Fee rate tiers in sat/vB.
    async fn fee_estimates(&self) -> Result<FeeEstimate, SourceError>;

    /// Pending transaction figures.
    async fn mempool_summary(&self) -> Result<MempoolSummary, SourceError>;
}

/// A source of node-level info records (full node only).
#[async_trait]
pub trait NodeInfoSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn blockchain_info(&self) -> Result<Value, SourceError>;

    async fn network_info(&self) -> Result<Value, SourceError>;

    async fn mining_info(&self) -> Result<Value, SourceError>;
}

/// The three node-info records, each polled on its own timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeInfoKind {
    Blockchain,
    Network,
    Mining,
}

impl NodeInfoKind {
    pub const ALL: [NodeInfoKind; 3] = [Self::Blockchain, Self::Network, Self::Mining];

    pub fn topic(&self) -> Topic {
        match self {
            Self::Blockchain => Topic::BlockchainInfo,
            Self::Network => Topic::BlockchainNetwork,
            Self::Mining => Topic::BlockchainMining,
        }
    }

    /// Fetch this record from `source`.
    pub async fn fetch(&self, source: &dyn NodeInfoSource) -> Result<Value, SourceError> {
        match self {
            Self::Blockchain => source.blockchain_info().await,
            Self::Network => source.network_info().await,
            Self::Mining => source.mining_info().await,
        }
    }

    /// Wrap a fetched record in its hub event.
    pub fn into_event(self, record: Value) -> HubEvent {
        match self {
            Self::Blockchain => HubEvent::BlockchainInfo(record),
            Self::Network => HubEvent::BlockchainNetwork(record),
            Self::Mining => HubEvent::BlockchainMining(record),
        }
    }
}

impl std::fmt::Display for NodeInfoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blockchain => write!(f, "blockchain"),
            Self::Network => write!(f, "network"),
            Self::Mining => write!(f, "mining"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HeaderOnly;

    #[async_trait]
    impl ChainSource for HeaderOnly {
        fn name(&self) -> &str {
            "header-only"
        }
        async fn tip_header(&self) -> Result<TipHeader, SourceError> {
            Ok(TipHeader {
                height: 7,
                header_hex: "00".into(),
            })
        }
        async fn fee_estimates(&self) -> Result<FeeEstimate, SourceError> {
            Err(SourceError::Http("down".into()))
        }
        async fn mempool_summary(&self) -> Result<MempoolSummary, SourceError> {
            Err(SourceError::Http("down".into()))
        }
    }

    #[tokio::test]
    async fn tip_height_defaults_to_header_height() {
        assert_eq!(HeaderOnly.tip_height().await.unwrap(), 7);
    }

    #[test]
    fn node_info_events_carry_their_topic() {
        for kind in NodeInfoKind::ALL {
            let event = kind.into_event(serde_json::json!({}));
            assert_eq!(event.topic(), kind.topic());
        }
    }
}
