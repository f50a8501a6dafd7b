/// Solidity bindings for the registry contract and event decoding helpers.
use alloy::primitives::{B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;

use super::LedgerEntry;
use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    contract AssuredRegistry {
        event Logged(
            uint256 indexed id,
            address indexed submitter,
            bytes32 contentHash,
            string step,
            string metadataURI,
            uint256 timestamp
        );

        function log(bytes32 contentHash, string step, string metadataURI)
            external
            returns (uint256 id);

        function nextId() external view returns (uint256);

        function entries(uint256 id)
            external
            view
            returns (
                address submitter,
                bytes32 contentHash,
                string step,
                string metadataURI,
                uint256 timestamp
            );
    }
}

pub use AssuredRegistry::Logged;

/// Topic 0 of every `Logged` log.
pub fn logged_topic() -> B256 {
    Logged::SIGNATURE_HASH
}

/// Narrow a contract integer to `u64`.
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::Rpc(format!("{what} {value} does not fit in u64")));
    }
    Ok(value.as_limbs()[0])
}

/// Decode a raw `Logged` log.
pub fn decode_logged(topics: &[B256], data: &[u8]) -> Result<Logged> {
    Logged::decode_raw_log(topics.iter().copied(), data)
        .map_err(|e| LedgerError::Rpc(format!("cannot decode Logged event: {e}")))
}

/// Convert a decoded event into a ledger entry.
pub fn entry_from_event(
    event: &Logged,
    block_number: Option<u64>,
    tx_hash: Option<String>,
) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: u256_to_u64(event.id, "entry id")?,
        submitter: event.submitter.to_checksum(None),
        content_hash: ContentHash::from_bytes(event.contentHash.0),
        step: event.step.clone(),
        metadata_uri: event.metadataURI.clone(),
        timestamp: u256_to_u64(event.timestamp, "timestamp")?,
        block_number,
        tx_hash,
    })
}

/// Left-pad a `u64` into a 32-byte topic word.
pub fn u64_word(value: u64) -> B256 {
    B256::from(U256::from(value).to_be_bytes::<32>())
}
