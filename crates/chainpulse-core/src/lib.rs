//! chainpulse-core — foundation types and policies for ChainPulse.
//!
//! # Overview
//!
//! ChainPulse ingests chain-tip, fee and mempool signals from two unreliable
//! upstreams (a full node and an indexer server), reconciles them and fans
//! them out to live subscribers. The core crate defines:
//!
//! - [`ChainSource`] / [`NodeInfoSource`] — the upstream adapter contracts
//! - [`HubEvent`] / [`Envelope`] / [`Topic`] — the subscriber wire contract
//! - [`SourceError`] — structured upstream failure type
//! - [`ttl`] — confirmation-aware cache lifetimes
//! - [`SharedCache`] — TTL-bound key/value store shared by all components
//! - [`policy`] module — circuit breaker manager and log throttling

pub mod cache;
pub mod error;
pub mod event;
pub mod policy;
pub mod source;
pub mod ttl;
pub mod types;

pub use cache::SharedCache;
pub use error::SourceError;
pub use event::{Envelope, HubEvent, Topic, UnknownTopic};
pub use policy::{
    CallPermit, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerState, CircuitState,
    LogThrottle,
};
pub use source::{ChainSource, NodeInfoKind, NodeInfoSource};
pub use ttl::{ttl_for, ttl_seconds, EntityKind};
pub use types::{
    ChainTip, FeeEstimate, FxSnapshot, HealthState, MempoolSummary, PriceSnapshot, ReorgEvent,
    ServiceHealth, TipHeader,
};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
