/// On-chain anchoring against the `AssuredRegistry` contract.
///
/// Access is split into two capabilities:
/// - [`RegistryReader`]: read-only ledger queries, no key required
/// - [`RegistrySigner`]: submits `log(contentHash, step, metadataURI)`
///   transactions with a local signing key
///
/// Every successful `log` call creates a new ledger entry with a fresh,
/// contract-assigned id. Submitting the same hash twice yields two
/// entries; nothing here deduplicates.
pub mod abi;
pub mod registry;
pub mod rpc;
pub mod signer;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::ContentHash;
use crate::error::Result;

/// A `Logged` record of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Contract-assigned counter, never reused.
    pub id: u64,
    /// Checksummed address of the account that called `log`.
    pub submitter: String,
    pub content_hash: ContentHash,
    pub step: String,
    pub metadata_uri: String,
    /// Block timestamp recorded by the contract (Unix seconds).
    pub timestamp: u64,
    /// Known when the entry was read from event logs.
    pub block_number: Option<u64>,
    pub tx_hash: Option<String>,
}

/// Result of a confirmed `log` transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorOutcome {
    pub tx_hash: String,
    /// Id decoded from the emitted `Logged` event.
    pub entry_id: u64,
    pub block_number: Option<u64>,
    /// Registry contract address.
    pub contract: String,
    pub chain_id: u64,
}

/// Chain and registry contract a client is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub chain_id: u64,
    /// Registry contract address.
    pub contract: String,
}

impl Deployment {
    /// Addresses compare case-insensitively; checksumming only changes case.
    pub fn matches(&self, chain_id: u64, contract: &str) -> bool {
        self.chain_id == chain_id && self.contract.eq_ignore_ascii_case(contract)
    }
}

/// Block range for ledger queries. Unset bounds default to the contract's
/// deployment block and the chain head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

/// Read-only view of the registry.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// The deployment this reader queries.
    fn deployment(&self) -> Deployment;

    /// The id the next `log` call will receive (= number of entries).
    async fn next_id(&self) -> Result<u64>;

    /// A single entry by id, `None` if not yet assigned.
    async fn entry(&self, id: u64) -> Result<Option<LedgerEntry>>;

    /// `Logged` events in the block range, ascending by id.
    async fn logged_events(&self, query: LedgerQuery) -> Result<Vec<LedgerEntry>>;
}

/// Write access to the registry.
#[async_trait]
pub trait RegistrySigner: Send + Sync {
    /// Address that signs and submits transactions.
    fn submitter(&self) -> String;

    /// Submit one `log` transaction and wait for its receipt.
    ///
    /// Not retried on failure; the caller decides whether to re-invoke.
    async fn log(
        &self,
        content_hash: &ContentHash,
        step: &str,
        metadata_uri: &str,
    ) -> Result<AnchorOutcome>;
}
