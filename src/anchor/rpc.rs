/// Minimal Ethereum JSON-RPC transport over `reqwest`.
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, B256};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

/// A log as returned by `eth_getLogs` and inside receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    pub fn address(&self) -> Result<Address> {
        parse_address(&self.address)
    }

    pub fn topic_words(&self) -> Result<Vec<B256>> {
        self.topics.iter().map(|t| parse_b256(t)).collect()
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        decode_hex(&self.data)
    }

    pub fn block(&self) -> Result<Option<u64>> {
        self.block_number.as_deref().map(parse_quantity).transpose()
    }
}

/// Subset of `eth_getTransactionReceipt` used for anchoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    /// `0x1` success, `0x0` reverted.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0"))
    }

    pub fn block(&self) -> Result<Option<u64>> {
        self.block_number.as_deref().map(parse_quantity).transpose()
    }

    pub fn gas(&self) -> Result<Option<u64>> {
        self.gas_used.as_deref().map(parse_quantity).transpose()
    }
}

/// JSON-RPC client bound to one endpoint.
pub struct RpcClient {
    client: Client,
    url: String,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a JSON-RPC request. A `null` result deserializes into `T`
    /// when `T` is an `Option`, and is an error otherwise.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });
        debug!(method, id, "RPC call");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            return Err(LedgerError::Rpc(format!(
                "{method}: HTTP {}",
                resp.status()
            )));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| LedgerError::Rpc(format!("{method}: response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(LedgerError::Rpc(format!(
                "{method}: {} (code {})",
                err.message, err.code
            )));
        }

        let result = resp.result.unwrap_or(serde_json::Value::Null);
        let was_null = result.is_null();
        serde_json::from_value(result).map_err(|e| {
            if was_null {
                LedgerError::Rpc(format!("{method}: empty result"))
            } else {
                LedgerError::Rpc(format!("{method}: unexpected result: {e}"))
            }
        })
    }
}

/// Parse a hex quantity such as `0x1a`.
pub fn parse_quantity(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| LedgerError::Rpc(format!("invalid quantity '{value}': {e}")))
}

/// Encode a quantity in JSON-RPC form (no leading zeros).
pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| LedgerError::Rpc(format!("invalid hex data: {e}")))
}

pub fn encode_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn parse_b256(value: &str) -> Result<B256> {
    value
        .parse()
        .map_err(|e| LedgerError::Rpc(format!("invalid 32-byte word '{value}': {e}")))
}

pub fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| LedgerError::Rpc(format!("invalid address '{value}': {e}")))
}
