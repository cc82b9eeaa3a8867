//! Event sources: the [`EventSource`] trait and its JSON-RPC implementation.
//!
//! [`RpcEventSource`] polls a node over HTTP with `eth_blockNumber` and
//! fetches a whole block's receipts in one `eth_getBlockReceipts` call.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use chainsink_core::types::{Event, Log, TxStatus};

use crate::error::TrackerError;
use crate::filter::events_for_contract;

/// Produces the watched contract's events block by block.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Chain id reported by the node.
    async fn chain_id(&self) -> Result<u64, TrackerError>;

    /// Current head block number.
    async fn latest_block(&self) -> Result<u64, TrackerError>;

    /// Events in block `number`, in receipt order.
    async fn events_in_block(&self, number: u64) -> Result<Vec<Event>, TrackerError>;
}

// ─── JSON-RPC wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// A transaction receipt reduced to the fields events are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub tx_index: u64,
    pub status: TxStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    transaction_index: String,
    #[serde(default)]
    status: Option<String>,
    gas_used: String,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    data: String,
    log_index: String,
    transaction_index: String,
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, TrackerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| TrackerError::Decode(format!("quantity '{s}': {e}")))
}

fn parse<T: FromStr>(field: &str, raw: &str) -> Result<T, TrackerError>
where
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| TrackerError::Decode(format!("{field} '{raw}': {e}")))
}

impl TryFrom<RawLog> for Log {
    type Error = TrackerError;

    fn try_from(raw: RawLog) -> Result<Self, Self::Error> {
        Ok(Log {
            address: parse::<Address>("log address", &raw.address)?,
            topics: raw
                .topics
                .iter()
                .map(|t| parse::<B256>("topic", t))
                .collect::<Result<_, _>>()?,
            data: parse::<Bytes>("log data", &raw.data)?,
            log_index: parse_hex_u64(&raw.log_index)?,
            tx_index: parse_hex_u64(&raw.transaction_index)?,
        })
    }
}

impl TryFrom<RawReceipt> for Receipt {
    type Error = TrackerError;

    fn try_from(raw: RawReceipt) -> Result<Self, Self::Error> {
        // Pre-Byzantium receipts carry no status; treat them as successful.
        let status = match raw.status.as_deref() {
            Some(code) => TxStatus::from_code(parse_hex_u64(code)?),
            None => TxStatus::Success,
        };
        Ok(Receipt {
            tx_hash: parse::<B256>("transaction hash", &raw.transaction_hash)?,
            tx_index: parse_hex_u64(&raw.transaction_index)?,
            status,
            gas_used: parse_hex_u64(&raw.gas_used)?,
            logs: raw.logs.into_iter().map(Log::try_from).collect::<Result<_, _>>()?,
        })
    }
}

/// Decode an `eth_getBlockReceipts` result; `null` (unknown block) is empty.
pub fn receipts_from_json(value: Value) -> Result<Vec<Receipt>, TrackerError> {
    if value.is_null() {
        return Ok(vec![]);
    }
    let raw: Vec<RawReceipt> =
        serde_json::from_value(value).map_err(|e| TrackerError::Decode(format!("receipts: {e}")))?;
    raw.into_iter().map(Receipt::try_from).collect()
}

// ─── RpcEventSource ───────────────────────────────────────────────────────────

/// HTTP JSON-RPC source filtering receipts down to one contract.
pub struct RpcEventSource {
    url: String,
    http: reqwest::Client,
    contract: Address,
    next_id: AtomicU64,
}

impl RpcEventSource {
    pub fn new(url: impl Into<String>, contract: Address, timeout: Duration) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Rpc(format!("build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            contract,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, TrackerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrackerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TrackerError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| TrackerError::Rpc(format!("{method}: {e}")))?;
        if let Some(err) = body.error {
            return Err(TrackerError::Rpc(format!(
                "{method}: JSON-RPC error {}: {}",
                err.code, err.message
            )));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str) -> Result<u64, TrackerError> {
        let value = self.call(method, json!([])).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| TrackerError::Decode(format!("{method}: expected hex string, got {value}")))?;
        parse_hex_u64(raw)
    }
}

#[async_trait]
impl EventSource for RpcEventSource {
    async fn chain_id(&self) -> Result<u64, TrackerError> {
        self.quantity("eth_chainId").await
    }

    async fn latest_block(&self) -> Result<u64, TrackerError> {
        self.quantity("eth_blockNumber").await
    }

    async fn events_in_block(&self, number: u64) -> Result<Vec<Event>, TrackerError> {
        let value = self
            .call("eth_getBlockReceipts", json!([format!("0x{number:x}")]))
            .await?;
        let receipts = receipts_from_json(value)?;
        let total = receipts.len();
        let events = events_for_contract(number, receipts, self.contract);
        debug!(block = number, receipts = total, matched = events.len(), "block receipts fetched");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn receipts_decode_from_node_json() {
        let value = json!([{
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "transactionIndex": "0x3",
            "status": "0x0",
            "gasUsed": "0x5208",
            "blockNumber": "0x10",
            "logs": [{
                "address": "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238",
                "topics": [format!("0x{}", "dd".repeat(32))],
                "data": "0x01",
                "logIndex": "0x7",
                "transactionIndex": "0x3",
                "removed": false
            }]
        }]);

        let receipts = receipts_from_json(value).unwrap();
        assert_eq!(receipts.len(), 1);
        let receipt = &receipts[0];
        assert_eq!(receipt.tx_index, 3);
        assert_eq!(receipt.status, TxStatus::Failed);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.logs[0].log_index, 7);
        assert_eq!(receipt.logs[0].data.as_ref(), &[0x01]);
    }

    #[test]
    fn null_receipts_are_empty() {
        assert!(receipts_from_json(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn malformed_receipt_is_decode_error() {
        let value = json!([{ "transactionHash": "0x12", "transactionIndex": "0x0", "gasUsed": "0x0" }]);
        assert!(matches!(receipts_from_json(value), Err(TrackerError::Decode(_))));
    }
}
