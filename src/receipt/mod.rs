/// Chain proofs: local receipts linking a snapshot to its ledger entry.
///
/// A proof is written next to the snapshot once an anchor transaction has
/// been confirmed:
///
/// ```text
/// snapshots/design/p1_1700000000_c555f4c5fc1d.json
/// snapshots/design/p1_1700000000_c555f4c5fc1d.chainproof.json
/// ```
///
/// A missing proof means "not yet anchored". The manifest's chain record
/// is written first, so a confirmed entry whose proof never landed is
/// still known to the project and is not anchored twice.
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};
use crate::snapshot::Step;

/// Receipt stored as `<snapshot stem>.chainproof.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProof {
    /// Transaction hash (0x-prefixed hex).
    pub tx_hash: String,
    /// Registry contract address.
    pub contract: String,
    pub chain_id: u64,
    pub step: Step,
    /// SHA-256 of the snapshot bytes.
    pub content_hash: ContentHash,
    /// Id assigned by the contract, decoded from the `Logged` event.
    pub entry_id: u64,
    pub block_number: Option<u64>,
    pub anchored_at: DateTime<Utc>,
}

/// Anchoring state of a snapshot as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnchorStatus {
    Created,
    Anchored { entry_id: u64, tx_hash: String },
}

/// Path of the proof belonging to a snapshot file.
pub fn proof_path(snapshot_path: &Path) -> PathBuf {
    snapshot_path.with_extension("chainproof.json")
}

/// Write the proof for `snapshot_path`. Fails if one already exists.
pub fn write_chain_proof(snapshot_path: &Path, proof: &ChainProof) -> Result<PathBuf> {
    let path = proof_path(snapshot_path);
    let bytes = serde_json::to_vec_pretty(proof)
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(LedgerError::AlreadyAnchored {
                entry_id: proof.entry_id,
                tx_hash: proof.tx_hash.clone(),
            });
        }
        Err(e) => return Err(LedgerError::Io(e)),
    };
    file.write_all(&bytes)?;
    file.sync_all()?;

    info!(
        proof = %path.display(),
        entry_id = proof.entry_id,
        tx_hash = %proof.tx_hash,
        "Chain proof saved"
    );
    Ok(path)
}

/// Load the proof for a snapshot, `None` if it has not been anchored.
pub fn load_chain_proof(snapshot_path: &Path) -> Result<Option<ChainProof>> {
    let path = proof_path(snapshot_path);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LedgerError::Io(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| LedgerError::Serialization(format!("{}: {e}", path.display())))
}

pub fn anchor_status(snapshot_path: &Path) -> Result<AnchorStatus> {
    Ok(match load_chain_proof(snapshot_path)? {
        Some(proof) => AnchorStatus::Anchored {
            entry_id: proof.entry_id,
            tx_hash: proof.tx_hash,
        },
        None => AnchorStatus::Created,
    })
}
