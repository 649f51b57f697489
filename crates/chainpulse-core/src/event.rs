//! Subscriber wire contract: topics, events and the tagged envelope.
//!
//! Every delivered message has the shape
//! `{"type": "<topic>", "data": <payload>, "timestamp": <epoch millis>}`.
//! The topic tags are a stable contract with downstream clients.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ChainTip, FeeEstimate, FxSnapshot, MempoolSummary, PriceSnapshot, ReorgEvent};

/// The closed set of event kinds a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "tip.height")]
    TipHeight,
    #[serde(rename = "network.fees")]
    NetworkFees,
    #[serde(rename = "network.mempool")]
    NetworkMempool,
    #[serde(rename = "chain.reorg")]
    ChainReorg,
    #[serde(rename = "price.current")]
    PriceCurrent,
    #[serde(rename = "fx.rates")]
    FxRates,
    #[serde(rename = "blockchain.info")]
    BlockchainInfo,
    #[serde(rename = "blockchain.network")]
    BlockchainNetwork,
    #[serde(rename = "blockchain.mining")]
    BlockchainMining,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::TipHeight,
        Topic::NetworkFees,
        Topic::NetworkMempool,
        Topic::ChainReorg,
        Topic::PriceCurrent,
        Topic::FxRates,
        Topic::BlockchainInfo,
        Topic::BlockchainNetwork,
        Topic::BlockchainMining,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TipHeight => "tip.height",
            Self::NetworkFees => "network.fees",
            Self::NetworkMempool => "network.mempool",
            Self::ChainReorg => "chain.reorg",
            Self::PriceCurrent => "price.current",
            Self::FxRates => "fx.rates",
            Self::BlockchainInfo => "blockchain.info",
            Self::BlockchainNetwork => "blockchain.network",
            Self::BlockchainMining => "blockchain.mining",
        }
    }

    /// Whether the hub keeps the last value of this topic for replay to new
    /// subscribers. Reorgs are one-off transitions, not state.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::ChainReorg)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a tag outside the closed topic set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

/// A semantic event produced by the polling engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HubEvent {
    #[serde(rename = "tip.height")]
    TipHeight(ChainTip),
    #[serde(rename = "network.fees")]
    Fees(FeeEstimate),
    #[serde(rename = "network.mempool")]
    Mempool(MempoolSummary),
    #[serde(rename = "chain.reorg")]
    Reorg(ReorgEvent),
    #[serde(rename = "price.current")]
    Price(PriceSnapshot),
    #[serde(rename = "fx.rates")]
    Fx(FxSnapshot),
    #[serde(rename = "blockchain.info")]
    BlockchainInfo(Value),
    #[serde(rename = "blockchain.network")]
    BlockchainNetwork(Value),
    #[serde(rename = "blockchain.mining")]
    BlockchainMining(Value),
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::TipHeight(_) => Topic::TipHeight,
            Self::Fees(_) => Topic::NetworkFees,
            Self::Mempool(_) => Topic::NetworkMempool,
            Self::Reorg(_) => Topic::ChainReorg,
            Self::Price(_) => Topic::PriceCurrent,
            Self::Fx(_) => Topic::FxRates,
            Self::BlockchainInfo(_) => Topic::BlockchainInfo,
            Self::BlockchainNetwork(_) => Topic::BlockchainNetwork,
            Self::BlockchainMining(_) => Topic::BlockchainMining,
        }
    }
}

/// An event stamped with its emission time, ready for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    #[serde(flatten)]
    pub event: &'a HubEvent,
    pub timestamp: i64,
}

impl<'a> Envelope<'a> {
    pub fn new(event: &'a HubEvent, timestamp: i64) -> Self {
        Self { event, timestamp }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
