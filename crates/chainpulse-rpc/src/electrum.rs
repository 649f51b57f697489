//! Electrum-protocol adapter: newline-delimited JSON-RPC over TCP.
//!
//! Each call opens a fresh connection, writes its requests, reads one
//! response line per request and closes. The whole exchange is bounded by
//! the configured timeout.
//!
//! The protocol has no pending-transaction count, so
//! [`mempool_summary`](ChainSource::mempool_summary) reports `0` pending
//! with the total vsize taken from the fee histogram.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainpulse_core::{ChainSource, FeeEstimate, MempoolSummary, SourceError, TipHeader};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::node::{btc_per_kvb_to_sat_per_vb, FEE_TARGETS};
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectrumConfig {
    pub name: String,
    /// `host:port` of the Electrum server (plain TCP).
    pub addr: String,
    pub timeout_ms: u64,
}

impl Default for ElectrumConfig {
    fn default() -> Self {
        Self {
            name: "electrum".into(),
            addr: "127.0.0.1:50001".into(),
            timeout_ms: 5_000,
        }
    }
}

pub struct ElectrumClient {
    config: ElectrumConfig,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct HeaderNotification {
    height: u64,
    hex: String,
}

impl ElectrumClient {
    pub fn new(config: ElectrumConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Call a single method and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, SourceError> {
        let mut results = self.call_many(&[(method, params)]).await?;
        match results.pop() {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(SourceError::Decode(format!("no response to {method}"))),
        }
    }

    /// Send several requests on one connection. Results come back in
    /// request order regardless of the order the server answers in.
    pub async fn call_many(&self, calls: &[(&str, Vec<Value>)]) -> Result<Vec<Value>, SourceError> {
        let timeout = self.timeout();
        match tokio::time::timeout(timeout, self.exchange(calls)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn exchange(&self, calls: &[(&str, Vec<Value>)]) -> Result<Vec<Value>, SourceError> {
        let stream = TcpStream::connect(&self.config.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut payload = String::new();
        let mut slots = HashMap::with_capacity(calls.len());
        for (slot, (method, params)) in calls.iter().enumerate() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            slots.insert(id, slot);
            payload.push_str(&serde_json::to_string(&JsonRpcRequest::new(id, method, params.clone()))?);
            payload.push('\n');
        }
        write_half.write_all(payload.as_bytes()).await?;
        write_half.flush().await?;

        let mut results: Vec<Option<Value>> = vec![None; calls.len()];
        let mut lines = BufReader::new(read_half).lines();
        let mut pending = calls.len();
        while pending > 0 {
            let Some(line) = lines.next_line().await? else {
                return Err(SourceError::Decode("connection closed mid-response".into()));
            };
            if line.trim().is_empty() {
                continue;
            }
            let resp: JsonRpcResponse = serde_json::from_str(&line)?;
            // Unsolicited notifications carry no id.
            let Some(RpcId::Number(id)) = resp.id else {
                continue;
            };
            let Some(&slot) = slots.get(&id) else {
                continue;
            };
            if results[slot].is_none() {
                results[slot] = Some(resp.into_result::<Value>()?);
                pending -= 1;
            }
        }

        tracing::trace!(addr = %self.config.addr, calls = calls.len(), "electrum exchange");
        Ok(results.into_iter().map(|r| r.unwrap_or(Value::Null)).collect())
    }
}

/// Sum of the vsize column of a `mempool.get_fee_histogram` result.
pub fn histogram_vsize(histogram: &[(f64, u64)]) -> u64 {
    histogram.iter().map(|(_, vsize)| vsize).sum()
}

/// Convert a `blockchain.estimatefee` result (BTC/kB, `-1` when unknown).
fn estimate_to_sat_per_vb(target: u64, value: &Value) -> Result<f64, SourceError> {
    match value.as_f64() {
        Some(rate) if rate >= 0.0 => Ok(btc_per_kvb_to_sat_per_vb(rate)),
        _ => Err(SourceError::Decode(format!("no fee estimate for {target} blocks"))),
    }
}

#[async_trait]
impl ChainSource for ElectrumClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn tip_header(&self) -> Result<TipHeader, SourceError> {
        let tip: HeaderNotification = self.call("blockchain.headers.subscribe", vec![]).await?;
        Ok(TipHeader {
            height: tip.height,
            header_hex: tip.hex,
        })
    }

    async fn fee_estimates(&self) -> Result<FeeEstimate, SourceError> {
        let calls = FEE_TARGETS.map(|target| ("blockchain.estimatefee", vec![json!(target)]));
        let results = self.call_many(&calls).await?;
        let rates = FEE_TARGETS
            .iter()
            .zip(&results)
            .map(|(target, value)| estimate_to_sat_per_vb(*target, value))
            .collect::<Result<Vec<_>, _>>()?;
        match rates[..] {
            [fast, normal, slow] => Ok(FeeEstimate { fast, normal, slow }),
            _ => Err(SourceError::Decode("incomplete fee estimates".into())),
        }
    }

    async fn mempool_summary(&self) -> Result<MempoolSummary, SourceError> {
        let histogram: Vec<(f64, u64)> = self.call("mempool.get_fee_histogram", vec![]).await?;
        Ok(MempoolSummary {
            pending_count: 0,
            vsize_bytes: Some(histogram_vsize(&histogram)),
        })
    }
}

impl std::fmt::Debug for ElectrumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectrumClient")
            .field("name", &self.config.name)
            .field("addr", &self.config.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Line-oriented fake server: answers each request via `respond`,
    /// echoing the request id.
    async fn fake_server<F>(respond: F) -> String
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let respond = std::sync::Arc::new(respond);
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let respond = respond.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = socket.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let req: Value = serde_json::from_str(&line).unwrap();
                        let method = req["method"].as_str().unwrap().to_string();
                        let body = respond(&method, &req["params"]);
                        let mut resp = json!({ "jsonrpc": "2.0", "id": req["id"] });
                        if let Some(err) = body.get("error") {
                            resp["error"] = err.clone();
                        } else {
                            resp["result"] = body;
                        }
                        let out = format!("{resp}\n");
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    fn client(addr: String) -> ElectrumClient {
        ElectrumClient::new(ElectrumConfig {
            addr,
            ..ElectrumConfig::default()
        })
    }

    #[test]
    fn histogram_sums_vsize() {
        assert_eq!(histogram_vsize(&[(50.0, 1_000), (10.0, 250_000), (1.0, 4_000_000)]), 4_251_000);
        assert_eq!(histogram_vsize(&[]), 0);
    }

    #[test]
    fn unknown_estimate_is_decode_error() {
        assert!(estimate_to_sat_per_vb(1, &json!(-1)).is_err());
        assert_eq!(estimate_to_sat_per_vb(6, &json!(0.0002)).unwrap(), 20.0);
    }

    #[tokio::test]
    async fn tip_header_from_subscribe() {
        let addr = fake_server(|method, _| match method {
            "blockchain.headers.subscribe" => json!({ "height": 840_000, "hex": "00e0ff3f" }),
            _ => json!({ "error": { "code": -32601, "message": "unknown method" } }),
        })
        .await;
        let tip = client(addr).tip_header().await.unwrap();
        assert_eq!(tip.height, 840_000);
        assert_eq!(tip.header_hex, "00e0ff3f");
    }

    #[tokio::test]
    async fn fee_tiers_map_to_targets() {
        let addr = fake_server(|_, params| match params[0].as_u64() {
            Some(1) => json!(0.0003),
            Some(6) => json!(0.0001),
            _ => json!(0.00001),
        })
        .await;
        let fees = client(addr).fee_estimates().await.unwrap();
        assert_eq!(fees, FeeEstimate { fast: 30.0, normal: 10.0, slow: 1.0 });
    }

    #[tokio::test]
    async fn mempool_reports_vsize_only() {
        let addr = fake_server(|_, _| json!([[20.0, 100_000], [2.0, 900_000]])).await;
        let summary = client(addr).mempool_summary().await.unwrap();
        assert_eq!(summary.pending_count, 0);
        assert_eq!(summary.vsize_bytes, Some(1_000_000));
    }

    #[tokio::test]
    async fn server_error_is_rpc_error() {
        let addr = fake_server(|_, _| json!({ "error": { "code": 1, "message": "daemon busy" } })).await;
        match client(addr).tip_height().await {
            Err(SourceError::Rpc { code, message }) => {
                assert_eq!(code, 1);
                assert_eq!(message, "daemon busy");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_io_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let err = client(addr).tip_height().await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
        assert!(err.is_transient());
    }
}
