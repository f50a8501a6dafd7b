/// Write-once persistence of snapshot files.
///
/// Files are created with create-new semantics: an existing file is never
/// truncated or replaced, and a name clash surfaces as
/// [`LedgerError::SnapshotExists`].
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use reqwest::Url;
use tracing::debug;

use super::Snapshot;
use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};

/// Hex characters of the digest embedded in snapshot filenames.
pub const FILENAME_HASH_PREFIX: usize = 12;

/// Suffix of the receipt written next to an anchored snapshot.
pub const CHAINPROOF_SUFFIX: &str = ".chainproof.json";

/// A snapshot that has been persisted.
#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub path: PathBuf,
    pub content_hash: ContentHash,
    /// `file://` URL of the snapshot, submitted as `metadataURI`.
    pub metadata_uri: String,
    pub size: u64,
}

/// `<project>_<timestamp>_<hash prefix>.json`
pub fn snapshot_file_name(snapshot: &Snapshot, hash: &ContentHash) -> String {
    format!(
        "{}_{}_{}.json",
        snapshot.project_id,
        snapshot.timestamp_unix,
        hash.hex_prefix(FILENAME_HASH_PREFIX)
    )
}

/// Whether a directory entry is a snapshot (and not a chain proof).
pub fn is_snapshot_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".json") && !name.ends_with(CHAINPROOF_SUFFIX)
}

/// Serialize, hash and write a snapshot into `dir`.
pub fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> Result<WrittenSnapshot> {
    let bytes = snapshot.canonical_bytes()?;
    let content_hash = ContentHash::of(&bytes);

    fs::create_dir_all(dir)?;
    let path = dir.join(snapshot_file_name(snapshot, &content_hash));

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(LedgerError::SnapshotExists(path.display().to_string()));
        }
        Err(e) => return Err(LedgerError::Io(e)),
    };
    file.write_all(&bytes)?;
    file.sync_all()?;

    let metadata_uri = file_uri(&path)?;
    debug!(path = %path.display(), hash = %content_hash, "Snapshot written");

    Ok(WrittenSnapshot {
        path,
        content_hash,
        metadata_uri,
        size: bytes.len() as u64,
    })
}

/// Read a snapshot file and hash its bytes exactly as stored.
pub fn read_snapshot(path: &Path) -> Result<(Snapshot, ContentHash)> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LedgerError::NotFound(path.display().to_string()),
        _ => LedgerError::Io(e),
    })?;
    let content_hash = ContentHash::of(&bytes);
    let snapshot = Snapshot::from_bytes(&bytes)?;
    Ok((snapshot, content_hash))
}

/// Absolute `file://` URL for a path on disk.
pub fn file_uri(path: &Path) -> Result<String> {
    let absolute = fs::canonicalize(path)?;
    Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|_| {
            LedgerError::Validation(format!("cannot build file URL for {}", absolute.display()))
        })
}
