//! Test doubles for the registry: an in-process JSON-RPC node and an
//! in-memory registry implementing both capability traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use super::abi::{self, AssuredRegistry, Logged};
use super::rpc;
use super::{AnchorOutcome, Deployment, LedgerEntry, LedgerQuery, RegistryReader, RegistrySigner};
use crate::config::ChainConfig;
use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};

/// First well-known development key (Hardhat/Anvil account #0).
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

const FAKE_CHAIN_ID: u64 = 31_337;
const GENESIS_HEAD: u64 = 100;
const ESTIMATED_GAS: u64 = 100_000;

struct FakeEntry {
    submitter: Address,
    content_hash: B256,
    step: String,
    metadata_uri: String,
    timestamp: u64,
    block: u64,
    tx_hash: B256,
}

/// Mutable state of the fake chain. Flags apply to the next transaction.
pub struct FakeChain {
    pub chain_id: u64,
    pub head: u64,
    pub revert_next: bool,
    pub fail_estimate: bool,
    pub omit_events: bool,
    pub never_mine: bool,
    contract: Address,
    nonce: u64,
    entries: Vec<FakeEntry>,
    receipts: HashMap<String, (Value, u32)>,
    get_logs_calls: usize,
    sent: usize,
    last_gas_limit: Option<u64>,
}

impl FakeChain {
    fn log_json(&self, id: usize) -> Value {
        let entry = &self.entries[id];
        let event = Logged {
            id: U256::from(id),
            submitter: entry.submitter,
            contentHash: entry.content_hash,
            step: entry.step.clone(),
            metadataURI: entry.metadata_uri.clone(),
            timestamp: U256::from(entry.timestamp),
        };
        json!({
            "address": self.contract.to_checksum(None),
            "topics": [
                abi::logged_topic().to_string(),
                abi::u64_word(id as u64).to_string(),
                entry.submitter.into_word().to_string(),
            ],
            "data": rpc::encode_hex(&event.encode_data()),
            "blockNumber": rpc::to_quantity(entry.block),
            "transactionHash": entry.tx_hash.to_string(),
            "removed": false,
        })
    }

    fn push_entry(
        &mut self,
        submitter: Address,
        content_hash: B256,
        step: String,
        metadata_uri: String,
        tx_hash: B256,
    ) -> usize {
        self.head += 1;
        self.entries.push(FakeEntry {
            submitter,
            content_hash,
            step,
            metadata_uri,
            timestamp: 1_700_000_000 + self.head,
            block: self.head,
            tx_hash,
        });
        self.entries.len() - 1
    }

    fn handle(&mut self, method: &str, params: &Value) -> std::result::Result<Value, String> {
        match method {
            "eth_chainId" => Ok(json!(rpc::to_quantity(self.chain_id))),
            "eth_blockNumber" => Ok(json!(rpc::to_quantity(self.head))),
            "eth_getTransactionCount" => Ok(json!(rpc::to_quantity(self.nonce))),
            "eth_estimateGas" => {
                if self.fail_estimate {
                    Err("execution reverted".into())
                } else {
                    Ok(json!(rpc::to_quantity(ESTIMATED_GAS)))
                }
            }
            "eth_sendRawTransaction" => self.send_raw(params),
            "eth_getTransactionReceipt" => {
                let hash = params[0].as_str().unwrap_or_default().to_string();
                if self.never_mine {
                    return Ok(Value::Null);
                }
                match self.receipts.get_mut(&hash) {
                    Some((_, polls)) if *polls == 0 => {
                        *polls += 1;
                        Ok(Value::Null)
                    }
                    Some((receipt, _)) => Ok(receipt.clone()),
                    None => Ok(Value::Null),
                }
            }
            "eth_getLogs" => {
                self.get_logs_calls += 1;
                let filter = &params[0];
                let bound = |key: &str| {
                    filter[key]
                        .as_str()
                        .and_then(|q| rpc::parse_quantity(q).ok())
                };
                let from = bound("fromBlock").unwrap_or(0);
                let to = bound("toBlock").unwrap_or(self.head);
                let logs: Vec<Value> = (0..self.entries.len())
                    .filter(|&id| (from..=to).contains(&self.entries[id].block))
                    .map(|id| self.log_json(id))
                    .collect();
                Ok(Value::Array(logs))
            }
            "eth_call" => self.call(params),
            other => Err(format!("method not found: {other}")),
        }
    }

    fn send_raw(&mut self, params: &Value) -> std::result::Result<Value, String> {
        let raw = rpc::decode_hex(params[0].as_str().unwrap_or_default())
            .map_err(|e| e.to_string())?;
        let envelope =
            TxEnvelope::decode_2718(&mut raw.as_slice()).map_err(|e| e.to_string())?;
        let signed = envelope
            .as_eip1559()
            .ok_or_else(|| "expected an EIP-1559 transaction".to_string())?;
        let tx = signed.tx();
        if tx.chain_id != self.chain_id {
            return Err("invalid chain id".into());
        }
        let call = AssuredRegistry::logCall::abi_decode(&tx.input).map_err(|e| e.to_string())?;

        self.sent += 1;
        self.nonce += 1;
        self.last_gas_limit = Some(tx.gas_limit);
        let tx_hash = keccak256(&raw);
        let hash_hex = tx_hash.to_string();

        let receipt = if std::mem::take(&mut self.revert_next) {
            self.head += 1;
            json!({
                "transactionHash": hash_hex,
                "status": "0x0",
                "blockNumber": rpc::to_quantity(self.head),
                "logs": [],
            })
        } else {
            let submitter: Address = TEST_ADDRESS.parse().map_err(|_| "bad address")?;
            let id = self.push_entry(
                submitter,
                call.contentHash,
                call.step,
                call.metadataURI,
                tx_hash,
            );
            let logs = if self.omit_events {
                json!([])
            } else {
                json!([self.log_json(id)])
            };
            json!({
                "transactionHash": hash_hex,
                "status": "0x1",
                "blockNumber": rpc::to_quantity(self.head),
                "gasUsed": rpc::to_quantity(ESTIMATED_GAS),
                "logs": logs,
            })
        };
        self.receipts.insert(hash_hex.clone(), (receipt, 0));
        Ok(json!(hash_hex))
    }

    fn call(&self, params: &Value) -> std::result::Result<Value, String> {
        let data = rpc::decode_hex(params[0]["data"].as_str().unwrap_or_default())
            .map_err(|e| e.to_string())?;
        if data.len() < 4 {
            return Err("calldata too short".into());
        }
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];

        let out = if selector == AssuredRegistry::nextIdCall::SELECTOR {
            U256::from(self.entries.len()).abi_encode()
        } else if selector == AssuredRegistry::entriesCall::SELECTOR {
            let call = AssuredRegistry::entriesCall::abi_decode(&data).map_err(|e| e.to_string())?;
            let id = abi::u256_to_u64(call.id, "id").map_err(|e| e.to_string())? as usize;
            match self.entries.get(id) {
                Some(e) => (
                    e.submitter,
                    e.content_hash,
                    e.step.clone(),
                    e.metadata_uri.clone(),
                    U256::from(e.timestamp),
                )
                    .abi_encode_params(),
                None => (Address::ZERO, B256::ZERO, String::new(), String::new(), U256::ZERO)
                    .abi_encode_params(),
            }
        } else {
            return Err("unknown selector".into());
        };
        Ok(json!(rpc::encode_hex(&out)))
    }
}

type SharedChain = Arc<Mutex<FakeChain>>;

async fn rpc_handler(State(chain): State<SharedChain>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default().to_string();
    let result = chain.lock().unwrap().handle(&method, &req["params"]);
    Json(match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32000, "message": message },
        }),
    })
}

/// A JSON-RPC node on an ephemeral local port, hosting one registry.
pub struct FakeNode {
    url: String,
    chain: SharedChain,
}

impl FakeNode {
    pub async fn spawn() -> Self {
        let chain = Arc::new(Mutex::new(FakeChain {
            chain_id: FAKE_CHAIN_ID,
            head: GENESIS_HEAD,
            revert_next: false,
            fail_estimate: false,
            omit_events: false,
            never_mine: false,
            contract: Address::repeat_byte(0xCC),
            nonce: 0,
            entries: Vec::new(),
            receipts: HashMap::new(),
            get_logs_calls: 0,
            sent: 0,
            last_gas_limit: None,
        }));

        let app = Router::new()
            .route("/", post(rpc_handler))
            .with_state(chain.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            chain,
        }
    }

    pub fn chain_config(&self) -> ChainConfig {
        let chain = self.chain.lock().unwrap();
        let mut config = ChainConfig::new(self.url.clone(), chain.contract, chain.chain_id);
        config.poll_interval = Duration::from_millis(10);
        config.receipt_timeout = Duration::from_secs(5);
        config
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.lock().unwrap().chain_id
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeChain)) {
        f(&mut self.chain.lock().unwrap());
    }

    /// Record an entry directly, as if another client had logged it.
    pub fn seed_entry(&self, hash: ContentHash, step: &str, metadata_uri: &str) {
        let mut chain = self.chain.lock().unwrap();
        let tx_hash = keccak256(chain.entries.len().to_be_bytes());
        chain.push_entry(
            Address::repeat_byte(0x22),
            B256::from(*hash.as_bytes()),
            step.to_string(),
            metadata_uri.to_string(),
            tx_hash,
        );
    }

    pub fn get_logs_calls(&self) -> usize {
        self.chain.lock().unwrap().get_logs_calls
    }

    pub fn sent_transactions(&self) -> usize {
        self.chain.lock().unwrap().sent
    }

    pub fn last_gas_limit(&self) -> Option<u64> {
        self.chain.lock().unwrap().last_gas_limit
    }
}

/// In-memory registry for pipeline and server tests.
pub struct MemoryRegistry {
    chain_id: u64,
    entries: Mutex<Vec<LedgerEntry>>,
    fail: AtomicBool,
}

impl MemoryRegistry {
    pub const CHAIN_ID: u64 = FAKE_CHAIN_ID;
    pub const CONTRACT: &'static str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    pub fn new() -> Arc<Self> {
        Self::on_chain(Self::CHAIN_ID)
    }

    /// A registry at the same address on another chain.
    pub fn on_chain(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            entries: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Make every subsequent `log` call fail with an RPC error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Overwrite the stored hash of an entry.
    pub fn tamper(&self, id: u64, hash: ContentHash) {
        self.entries.lock().unwrap()[id as usize].content_hash = hash;
    }
}

#[async_trait]
impl RegistryReader for MemoryRegistry {
    fn deployment(&self) -> Deployment {
        Deployment {
            chain_id: self.chain_id,
            contract: Self::CONTRACT.to_string(),
        }
    }

    async fn next_id(&self) -> Result<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn entry(&self, id: u64) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.lock().unwrap().get(id as usize).cloned())
    }

    async fn logged_events(&self, query: LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let from = query.from_block.unwrap_or(0);
        let to = query.to_block.unwrap_or(u64::MAX);
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number.is_some_and(|b| (from..=to).contains(&b)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RegistrySigner for MemoryRegistry {
    fn submitter(&self) -> String {
        TEST_ADDRESS.to_string()
    }

    async fn log(
        &self,
        content_hash: &ContentHash,
        step: &str,
        metadata_uri: &str,
    ) -> Result<AnchorOutcome> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("connection refused".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        let id = entries.len() as u64;
        let block = GENESIS_HEAD + id + 1;
        let tx_hash = keccak256(id.to_be_bytes()).to_string();
        entries.push(LedgerEntry {
            id,
            submitter: TEST_ADDRESS.to_string(),
            content_hash: *content_hash,
            step: step.to_string(),
            metadata_uri: metadata_uri.to_string(),
            timestamp: 1_700_000_000 + id,
            block_number: Some(block),
            tx_hash: Some(tx_hash.clone()),
        });
        Ok(AnchorOutcome {
            tx_hash,
            entry_id: id,
            block_number: Some(block),
            contract: Self::CONTRACT.to_string(),
            chain_id: self.chain_id,
        })
    }
}
