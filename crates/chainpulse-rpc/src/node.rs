//! Full-node JSON-RPC adapter over HTTP, backed by `reqwest`.
//!
//! Calls used:
//! - `getblockchaininfo` + `getblockheader <hash> false` — tip header
//! - `getblockcount` — tip height
//! - `estimatesmartfee 1|6|144` — fast / normal / slow fee tiers
//! - `getmempoolinfo` — pending count and total vsize
//! - `getblockchaininfo` / `getnetworkinfo` / `getmininginfo` — node info records

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainpulse_core::{ChainSource, FeeEstimate, MempoolSummary, NodeInfoSource, SourceError, TipHeader};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Confirmation targets (blocks) for the fast / normal / slow tiers.
pub const FEE_TARGETS: [u64; 3] = [1, 6, 144];

/// Connection settings for a full node's RPC interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRpcConfig {
    /// Service name; keys circuit breakers and the health table.
    pub name: String,
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            name: "node".into(),
            url: "http://127.0.0.1:8332".into(),
            user: None,
            password: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// JSON-RPC client for a Bitcoin-style full node.
pub struct NodeRpcClient {
    config: NodeRpcConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl NodeRpcClient {
    pub fn new(config: NodeRpcConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Call `method` and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut builder = self.http.post(&self.config.url).json(&req);
        if let Some(user) = &self.config.user {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        // Bitcoin Core reports RPC errors with a 500 status and a JSON body,
        // so only give up on the body when it is not JSON-RPC.
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        let parsed: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(SourceError::Http(format!("HTTP {}: {}", status.as_u16(), body)));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::trace!(method, id, "node rpc call");
        parsed.into_result()
    }

    async fn fee_rate(&self, target: u64) -> Result<f64, SourceError> {
        let estimate: SmartFee = self.call("estimatesmartfee", vec![json!(target)]).await?;
        estimate.sat_per_vb(target)
    }
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    blocks: u64,
    bestblockhash: String,
}

#[derive(Debug, Deserialize)]
struct SmartFee {
    /// BTC/kvB; absent when the node has too little data.
    feerate: Option<f64>,
    #[serde(default)]
    errors: Vec<String>,
}

impl SmartFee {
    fn sat_per_vb(&self, target: u64) -> Result<f64, SourceError> {
        match self.feerate {
            Some(rate) if rate >= 0.0 => Ok(btc_per_kvb_to_sat_per_vb(rate)),
            _ => Err(SourceError::Decode(format!(
                "no fee estimate for {target} blocks: {}",
                self.errors.join("; ")
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MempoolInfo {
    size: u64,
    bytes: u64,
}

/// 1 BTC/kvB = 1e8 sat / 1000 vB = 1e5 sat/vB.
pub fn btc_per_kvb_to_sat_per_vb(rate: f64) -> f64 {
    rate * 100_000.0
}

#[async_trait]
impl ChainSource for NodeRpcClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn tip_header(&self) -> Result<TipHeader, SourceError> {
        let info: BlockchainInfo = self.call("getblockchaininfo", vec![]).await?;
        let header_hex: String = self
            .call("getblockheader", vec![json!(info.bestblockhash), json!(false)])
            .await?;
        Ok(TipHeader {
            height: info.blocks,
            header_hex,
        })
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        self.call("getblockcount", vec![]).await
    }

    async fn fee_estimates(&self) -> Result<FeeEstimate, SourceError> {
        let [fast, normal, slow] = FEE_TARGETS;
        let (fast, normal, slow) = futures::try_join!(
            self.fee_rate(fast),
            self.fee_rate(normal),
            self.fee_rate(slow),
        )?;
        Ok(FeeEstimate { fast, normal, slow })
    }

    async fn mempool_summary(&self) -> Result<MempoolSummary, SourceError> {
        let info: MempoolInfo = self.call("getmempoolinfo", vec![]).await?;
        Ok(MempoolSummary {
            pending_count: info.size,
            vsize_bytes: Some(info.bytes),
        })
    }
}

#[async_trait]
impl NodeInfoSource for NodeRpcClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn blockchain_info(&self) -> Result<Value, SourceError> {
        self.call("getblockchaininfo", vec![]).await
    }

    async fn network_info(&self) -> Result<Value, SourceError> {
        self.call("getnetworkinfo", vec![]).await
    }

    async fn mining_info(&self) -> Result<Value, SourceError> {
        self.call("getmininginfo", vec![]).await
    }
}

impl std::fmt::Debug for NodeRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRpcClient")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("auth", &self.config.user.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn fee_rate_conversion() {
        assert_eq!(btc_per_kvb_to_sat_per_vb(0.0001), 10.0);
        assert_eq!(btc_per_kvb_to_sat_per_vb(0.00001), 1.0);
    }

    #[test]
    fn missing_feerate_is_decode_error() {
        let fee: SmartFee =
            serde_json::from_str(r#"{"errors":["Insufficient data or no feerate found"],"blocks":2}"#)
                .unwrap();
        let err = fee.sat_per_vb(1).unwrap_err();
        assert!(err.to_string().contains("Insufficient data"));

        let fee: SmartFee = serde_json::from_str(r#"{"feerate":0.00012,"blocks":2}"#).unwrap();
        assert!((fee.sat_per_vb(1).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn debug_hides_credentials() {
        let client = NodeRpcClient::new(NodeRpcConfig {
            user: Some("rpc".into()),
            password: Some("hunter2".into()),
            ..NodeRpcConfig::default()
        })
        .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("auth: true"));
    }

    /// Answer one HTTP request with `body` and return the request text.
    async fn serve_once(listener: TcpListener, status: &'static str, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    }

    async fn client_for(listener: &TcpListener) -> NodeRpcClient {
        let addr = listener.local_addr().unwrap();
        NodeRpcClient::new(NodeRpcConfig {
            url: format!("http://{addr}"),
            user: Some("rpc".into()),
            password: Some("secret".into()),
            ..NodeRpcConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn block_count_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let server = tokio::spawn(serve_once(listener, "200 OK", r#"{"result":840000,"error":null,"id":1}"#));

        assert_eq!(client.tip_height().await.unwrap(), 840_000);
        let request = server.await.unwrap();
        assert!(request.contains("\"method\":\"getblockcount\""));
        assert!(request.to_ascii_lowercase().contains("authorization: basic"));
    }

    #[tokio::test]
    async fn rpc_error_with_500_status_is_rpc_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        tokio::spawn(serve_once(
            listener,
            "500 Internal Server Error",
            r#"{"result":null,"error":{"code":-28,"message":"Loading block index..."},"id":1}"#,
        ));

        match client.mempool_summary().await {
            Err(SourceError::Rpc { code, .. }) => assert_eq!(code, -28),
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_status_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        tokio::spawn(serve_once(listener, "401 Unauthorized", ""));

        assert!(matches!(client.tip_height().await, Err(SourceError::Http(_))));
    }
}
