//! chainpulse-rpc — thin upstream adapters.
//!
//! Adapters call one method, decode the result or return a
//! [`SourceError`](chainpulse_core::SourceError). Timeouts beyond the
//! transport's own, circuit breaking and logging policy belong to the caller.
//!
//! - [`NodeRpcClient`] — full-node JSON-RPC over HTTP (`reqwest`)
//! - [`ElectrumClient`] — Electrum protocol over plain TCP

pub mod electrum;
pub mod node;
pub mod request;

pub use electrum::{ElectrumClient, ElectrumConfig};
pub use node::{NodeRpcClient, NodeRpcConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
