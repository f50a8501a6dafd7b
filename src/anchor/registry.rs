/// Read-only registry client.
///
/// Needs only an RPC endpoint and the contract address. Ledger history is
/// read from `Logged` events, paging `eth_getLogs` by block range so large
/// histories stay within provider limits.
use alloy::primitives::U256;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::debug;

use super::abi::{self, AssuredRegistry};
use super::rpc::{self, RpcClient, RpcLog};
use super::{Deployment, LedgerEntry, LedgerQuery, RegistryReader};
use crate::config::ChainConfig;
use crate::crypto::hash::ContentHash;
use crate::error::Result;

pub struct RegistryClient {
    rpc: RpcClient,
    config: ChainConfig,
}

impl RegistryClient {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            rpc: RpcClient::new(config.rpc_url.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub(crate) fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        let hex: String = self.rpc.call("eth_chainId", serde_json::json!([])).await?;
        rpc::parse_quantity(&hex)
    }

    pub async fn block_number(&self) -> Result<u64> {
        let hex: String = self
            .rpc
            .call("eth_blockNumber", serde_json::json!([]))
            .await?;
        rpc::parse_quantity(&hex)
    }

    /// `eth_call` against the registry at the latest block.
    async fn call_contract(&self, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let params = serde_json::json!([
            {
                "to": self.config.contract.to_string(),
                "data": rpc::encode_hex(&calldata),
            },
            "latest"
        ]);
        let hex: String = self.rpc.call("eth_call", params).await?;
        rpc::decode_hex(&hex)
    }

    async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RpcLog>> {
        let params = serde_json::json!([{
            "address": self.config.contract.to_string(),
            "topics": [abi::logged_topic().to_string()],
            "fromBlock": rpc::to_quantity(from_block),
            "toBlock": rpc::to_quantity(to_block),
        }]);
        self.rpc.call("eth_getLogs", params).await
    }
}

/// Decode `Logged` logs emitted by `contract`, skipping anything else.
pub(crate) fn decode_registry_logs(
    logs: &[RpcLog],
    contract: alloy::primitives::Address,
) -> Result<Vec<LedgerEntry>> {
    let mut entries = Vec::new();
    for log in logs {
        if log.removed || log.address()? != contract {
            continue;
        }
        let topics = log.topic_words()?;
        if topics.first() != Some(&abi::logged_topic()) {
            continue;
        }
        let event = abi::decode_logged(&topics, &log.data_bytes()?)?;
        entries.push(abi::entry_from_event(
            &event,
            log.block()?,
            log.transaction_hash.clone(),
        )?);
    }
    Ok(entries)
}

#[async_trait]
impl RegistryReader for RegistryClient {
    fn deployment(&self) -> Deployment {
        Deployment {
            chain_id: self.config.chain_id,
            contract: self.config.contract.to_checksum(None),
        }
    }

    async fn next_id(&self) -> Result<u64> {
        let data = self
            .call_contract(AssuredRegistry::nextIdCall {}.abi_encode())
            .await?;
        let next = AssuredRegistry::nextIdCall::abi_decode_returns(&data)
            .map_err(|e| crate::error::LedgerError::Rpc(format!("nextId decode: {e}")))?;
        abi::u256_to_u64(next, "nextId")
    }

    async fn entry(&self, id: u64) -> Result<Option<LedgerEntry>> {
        if id >= self.next_id().await? {
            return Ok(None);
        }
        let call = AssuredRegistry::entriesCall { id: U256::from(id) };
        let data = self.call_contract(call.abi_encode()).await?;
        let ret = AssuredRegistry::entriesCall::abi_decode_returns(&data)
            .map_err(|e| crate::error::LedgerError::Rpc(format!("entries decode: {e}")))?;

        Ok(Some(LedgerEntry {
            id,
            submitter: ret.submitter.to_checksum(None),
            content_hash: ContentHash::from_bytes(ret.contentHash.0),
            step: ret.step,
            metadata_uri: ret.metadataURI,
            timestamp: abi::u256_to_u64(ret.timestamp, "timestamp")?,
            block_number: None,
            tx_hash: None,
        }))
    }

    async fn logged_events(&self, query: LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let from = query.from_block.unwrap_or(self.config.deploy_block);
        let to = match query.to_block {
            Some(to) => to,
            None => self.block_number().await?,
        };
        if from > to {
            return Ok(Vec::new());
        }

        let page = self.config.log_page_blocks.max(1);
        let mut entries = Vec::new();
        let mut start = from;
        loop {
            let end = start.saturating_add(page - 1).min(to);
            let logs = self.get_logs(start, end).await?;
            debug!(from = start, to = end, logs = logs.len(), "Fetched Logged events");
            entries.extend(decode_registry_logs(&logs, self.config.contract)?);

            if end >= to {
                break;
            }
            start = end + 1;
        }

        entries.sort_by_key(|e| e.id);
        entries.dedup_by_key(|e| e.id);
        Ok(entries)
    }
}
