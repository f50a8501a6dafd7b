/// Snapshot pipeline orchestrator.
///
/// Coordinates the lifecycle of a stage submission:
/// 1. Capture: write the immutable snapshot and index it in the manifest
/// 2. Anchor: re-hash the file against its capture record, gate on
///    readiness, submit the hash to the registry, write the chain proof
/// 3. Verify: compare file, proof, deployment and ledger entry
///
/// Each snapshot moves `Created -> Anchored`. A failed anchor attempt is
/// recorded in the audit trail and leaves the snapshot `Created`, so the
/// operator can simply try again.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::anchor::{AnchorOutcome, Deployment, LedgerEntry, RegistryReader, RegistrySigner};
use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};
use crate::project::{AuditAction, AuditEntry, ChainRecord, SnapshotRecord, Workspace, SNAPSHOTS_DIR};
use crate::readiness::{self, Readiness};
use crate::receipt::{self, AnchorStatus, ChainProof};
use crate::snapshot::writer::{self, is_snapshot_file};
use crate::snapshot::{Snapshot, Step};

/// Result of capturing one submission.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub project: String,
    pub step: Step,
    pub path: PathBuf,
    /// Path relative to the project directory.
    pub relative_path: String,
    pub content_hash: ContentHash,
    pub metadata_uri: String,
    pub size: u64,
    pub readiness: Readiness,
}

/// Result of a confirmed anchor.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorResult {
    pub proof: ChainProof,
    pub proof_path: PathBuf,
    pub readiness: Readiness,
    /// Whether readiness issues were overridden.
    pub forced: bool,
}

/// Outcome of checking a snapshot against its proof and the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// No chain proof on disk.
    Unanchored { content_hash: ContentHash },
    /// File, proof and ledger entry agree.
    Verified {
        content_hash: ContentHash,
        entry: LedgerEntry,
    },
    /// The file no longer hashes to the value recorded in its proof.
    ProofMismatch {
        file_hash: ContentHash,
        proof_hash: ContentHash,
    },
    /// The proof was written against another chain or registry contract.
    DeploymentMismatch {
        proof: Deployment,
        reader: Deployment,
    },
    /// The proof names an entry the registry does not have.
    EntryMissing { entry_id: u64 },
    /// The ledger entry stores a different hash than the file.
    ChainMismatch {
        file_hash: ContentHash,
        chain_hash: ContentHash,
        entry_id: u64,
    },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }
}

/// A snapshot on disk with its anchoring state.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotListing {
    pub step: Step,
    pub file_name: String,
    pub relative_path: String,
    pub content_hash: ContentHash,
    pub status: AnchorStatus,
}

/// Write a new snapshot for `project` stamped with the current time.
pub fn capture(
    workspace: &Workspace,
    project: &str,
    step: Step,
    fields: Map<String, Value>,
) -> Result<CaptureResult> {
    capture_at(workspace, project, step, fields, Utc::now().timestamp())
}

/// Write a new snapshot with an explicit timestamp.
pub fn capture_at(
    workspace: &Workspace,
    project: &str,
    step: Step,
    fields: Map<String, Value>,
    timestamp_unix: i64,
) -> Result<CaptureResult> {
    let snapshot = Snapshot::new(step, project, timestamp_unix, fields)?;
    let dir = workspace.snapshot_dir(project, step)?;
    let written = writer::write_snapshot(&dir, &snapshot)?;
    let relative_path = workspace.relative_path(project, &written.path)?;

    workspace.register_snapshot(
        project,
        SnapshotRecord {
            step,
            path: relative_path.clone(),
            content_hash: written.content_hash,
            timestamp_unix,
        },
    )?;
    workspace.append_audit(
        project,
        AuditEntry::new(
            Some(step),
            AuditAction::SnapshotSaved,
            json!({ "path": relative_path, "content_hash": written.content_hash }),
        ),
    )?;

    let readiness = readiness::evaluate(step, &snapshot.fields);
    info!(
        project,
        step = %step,
        hash = %written.content_hash,
        ready = readiness.is_ready(),
        "Snapshot captured"
    );

    Ok(CaptureResult {
        project: project.to_string(),
        step,
        path: written.path,
        relative_path,
        content_hash: written.content_hash,
        metadata_uri: written.metadata_uri,
        size: written.size,
        readiness,
    })
}

/// Anchor a snapshot file on-chain and write its chain proof.
///
/// The file must still be byte-identical to its capture: canonical, and
/// hashing to the value the manifest recorded for its path.
pub async fn anchor(
    workspace: &Workspace,
    project: &str,
    snapshot_path: &Path,
    signer: &dyn RegistrySigner,
    force: bool,
) -> Result<AnchorResult> {
    workspace.project_dir(project)?;
    let (snapshot, content_hash) = writer::read_snapshot(snapshot_path)?;
    if snapshot.project_id != project {
        return Err(LedgerError::Validation(format!(
            "snapshot belongs to project '{}', not '{project}'",
            snapshot.project_id
        )));
    }
    let step = snapshot.step;
    let relative_path = workspace.relative_path(project, snapshot_path)?;

    if snapshot.content_hash()? != content_hash {
        return Err(LedgerError::SnapshotModified(format!(
            "{relative_path} is not in canonical form"
        )));
    }
    let manifest = workspace.load_manifest(project)?;
    let captured = manifest
        .snapshot_record_for(&relative_path)
        .ok_or_else(|| {
            LedgerError::Validation(format!(
                "{relative_path} was never captured in project '{project}'"
            ))
        })?;
    if captured.content_hash != content_hash {
        return Err(LedgerError::SnapshotModified(format!(
            "{relative_path} hashes to {content_hash}, captured as {}",
            captured.content_hash
        )));
    }

    if let Some(proof) = receipt::load_chain_proof(snapshot_path)? {
        return Err(LedgerError::AlreadyAnchored {
            entry_id: proof.entry_id,
            tx_hash: proof.tx_hash,
        });
    }
    if let Some(record) = manifest.chain_record_for(&content_hash) {
        return Err(LedgerError::AlreadyAnchored {
            entry_id: record.entry_id,
            tx_hash: record.tx_hash.clone(),
        });
    }

    let readiness = readiness::evaluate(step, &snapshot.fields);
    if !readiness.is_ready() {
        if !force {
            return Err(LedgerError::NotReady(readiness.issues));
        }
        warn!(
            project,
            step = %step,
            issues = readiness.issues.len(),
            "Anchoring despite readiness issues"
        );
    }

    let metadata_uri = writer::file_uri(snapshot_path)?;
    info!(project, step = %step, hash = %content_hash, "Anchoring snapshot");

    let outcome = match signer.log(&content_hash, step.label(), &metadata_uri).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(project, step = %step, error = %e, "Anchor failed");
            let audit = AuditEntry::new(
                Some(step),
                AuditAction::AnchorFailed,
                json!({
                    "content_hash": content_hash,
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                }),
            );
            if let Err(audit_err) = workspace.append_audit(project, audit) {
                warn!(project, error = %audit_err, "Could not record failed anchor");
            }
            return Err(e);
        }
    };

    let proof = ChainProof {
        tx_hash: outcome.tx_hash.clone(),
        contract: outcome.contract.clone(),
        chain_id: outcome.chain_id,
        step,
        content_hash,
        entry_id: outcome.entry_id,
        block_number: outcome.block_number,
        anchored_at: Utc::now(),
    };
    let proof_path = match record_anchor(workspace, project, snapshot_path, &proof, metadata_uri) {
        Ok(path) => path,
        Err(e) => {
            warn!(
                project,
                step = %step,
                entry_id = outcome.entry_id,
                tx_hash = %outcome.tx_hash,
                error = %e,
                "Anchor confirmed on-chain but not recorded locally"
            );
            let audit = AuditEntry::new(
                Some(step),
                AuditAction::AnchorUnrecorded,
                unrecorded_detail(&outcome, &content_hash, &e),
            );
            if let Err(audit_err) = workspace.append_audit(project, audit) {
                warn!(project, error = %audit_err, "Could not record unrecorded anchor");
            }
            return Err(e);
        }
    };

    workspace.append_audit(
        project,
        AuditEntry::new(
            Some(step),
            AuditAction::Anchored,
            json!({
                "entry_id": proof.entry_id,
                "tx_hash": proof.tx_hash,
                "forced": force && !readiness.is_ready(),
            }),
        ),
    )?;

    Ok(AnchorResult {
        forced: force && !readiness.is_ready(),
        proof,
        proof_path,
        readiness,
    })
}

/// Index the confirmed transaction in the manifest, then write the proof.
///
/// The manifest goes first: once it names the hash, a retry is refused
/// even if the proof never reaches disk.
fn record_anchor(
    workspace: &Workspace,
    project: &str,
    snapshot_path: &Path,
    proof: &ChainProof,
    metadata_uri: String,
) -> Result<PathBuf> {
    workspace.register_chain_tx(
        project,
        ChainRecord {
            step: proof.step,
            tx_hash: proof.tx_hash.clone(),
            content_hash: proof.content_hash,
            entry_id: proof.entry_id,
            metadata_uri,
            block_number: proof.block_number,
            anchored_at: proof.anchored_at,
        },
    )?;
    receipt::write_chain_proof(snapshot_path, proof)
}

fn unrecorded_detail(outcome: &AnchorOutcome, content_hash: &ContentHash, err: &LedgerError) -> Value {
    json!({
        "content_hash": content_hash,
        "tx_hash": outcome.tx_hash,
        "entry_id": outcome.entry_id,
        "block_number": outcome.block_number,
        "contract": outcome.contract,
        "chain_id": outcome.chain_id,
        "error": err.to_string(),
    })
}

/// Check a snapshot against its chain proof and the on-chain entry.
pub async fn verify(snapshot_path: &Path, reader: &dyn RegistryReader) -> Result<Verification> {
    let (_, file_hash) = writer::read_snapshot(snapshot_path)?;
    let Some(proof) = receipt::load_chain_proof(snapshot_path)? else {
        return Ok(Verification::Unanchored {
            content_hash: file_hash,
        });
    };

    if proof.content_hash != file_hash {
        return Ok(Verification::ProofMismatch {
            file_hash,
            proof_hash: proof.content_hash,
        });
    }

    let deployment = reader.deployment();
    if !deployment.matches(proof.chain_id, &proof.contract) {
        return Ok(Verification::DeploymentMismatch {
            proof: Deployment {
                chain_id: proof.chain_id,
                contract: proof.contract,
            },
            reader: deployment,
        });
    }

    let Some(entry) = reader.entry(proof.entry_id).await? else {
        return Ok(Verification::EntryMissing {
            entry_id: proof.entry_id,
        });
    };

    if entry.content_hash != file_hash {
        return Ok(Verification::ChainMismatch {
            file_hash,
            chain_hash: entry.content_hash,
            entry_id: entry.id,
        });
    }

    Ok(Verification::Verified {
        content_hash: file_hash,
        entry,
    })
}

/// Every snapshot of a project with its anchoring state, ordered by path.
pub fn list_snapshots(workspace: &Workspace, project: &str) -> Result<Vec<SnapshotListing>> {
    let root = workspace.project_dir(project)?.join(SNAPSHOTS_DIR);
    let mut listings = Vec::new();

    for step in Step::ALL {
        let dir = root.join(step.dir_name());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(LedgerError::Io(e)),
        };
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || !is_snapshot_file(&path) {
                continue;
            }
            let bytes = fs::read(&path)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            listings.push(SnapshotListing {
                step,
                relative_path: workspace.relative_path(project, &path)?,
                file_name,
                content_hash: ContentHash::of(&bytes),
                status: receipt::anchor_status(&path)?,
            });
        }
    }

    listings.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(listings)
}
