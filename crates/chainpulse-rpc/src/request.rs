//! JSON-RPC wire types shared by the node and Electrum adapters.
//!
//! Bitcoin Core answers legacy 1.0-style requests with `error: null`
//! and no `jsonrpc` member, so both are optional on responses.

use chainpulse_core::SourceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id: RpcId::Number(id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<RpcId>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Decode the result into `T`, or surface the upstream error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, SourceError> {
        if let Some(err) = self.error {
            return Err(SourceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(self.result.unwrap_or(Value::Null))?)
    }
}
