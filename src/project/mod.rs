/// Project workspace: one directory per project holding its snapshots,
/// chain proofs and a `manifest.json`.
///
/// ```text
/// <root>/<project id>/
///     manifest.json
///     snapshots/<step dir>/<project>_<ts>_<hash>.json
///     snapshots/<step dir>/<project>_<ts>_<hash>.chainproof.json
/// ```
///
/// The manifest is a bookkeeping index (snapshot list, chain transactions,
/// audit trail). Snapshot files and chain proofs remain the source of truth.
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};
use crate::snapshot::Step;

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Index of everything recorded for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub version: u8,
    /// Free-form project metadata (name, cell line, owner, status, ...).
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
    #[serde(default)]
    pub chain: Vec<ChainRecord>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub step: Step,
    /// Path relative to the project directory.
    pub path: String,
    pub content_hash: ContentHash,
    pub timestamp_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub step: Step,
    pub tx_hash: String,
    pub content_hash: ContentHash,
    pub entry_id: u64,
    pub metadata_uri: String,
    pub block_number: Option<u64>,
    pub anchored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ProjectCreated,
    MetaUpdated,
    SnapshotSaved,
    Anchored,
    AnchorFailed,
    /// Confirmed on-chain, but the proof or manifest write failed.
    AnchorUnrecorded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub step: Option<Step>,
    pub action: AuditAction,
    #[serde(default)]
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(step: Option<Step>, action: AuditAction, detail: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            at: Utc::now(),
            step,
            action,
            detail,
        }
    }
}

impl ProjectManifest {
    pub fn new(project_id: &str, meta: Map<String, Value>) -> Self {
        let mut base = Map::new();
        base.insert("project_name".into(), Value::String(String::new()));
        base.insert("cell_line".into(), Value::String(String::new()));
        base.insert("owner".into(), Value::String(String::new()));
        base.insert("status".into(), Value::String("draft".into()));
        let mut meta = deep_merge(base, meta);
        meta.insert("project_id".into(), Value::String(project_id.to_string()));
        meta.insert("created_at".into(), Value::from(Utc::now().timestamp()));

        Self {
            version: MANIFEST_VERSION,
            meta,
            snapshots: Vec::new(),
            chain: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Capture record of a snapshot by its project-relative path.
    pub fn snapshot_record_for(&self, path: &str) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|r| r.path == path)
    }

    /// Latest chain record for a content hash, if any.
    pub fn chain_record_for(&self, hash: &ContentHash) -> Option<&ChainRecord> {
        self.chain.iter().rev().find(|r| r.content_hash == *hash)
    }
}

/// Recursively merge `patch` into `base`. Nested objects merge; any other
/// value replaces.
pub fn deep_merge(mut base: Map<String, Value>, patch: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in patch {
        match (base.remove(&key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                base.insert(key, Value::Object(deep_merge(existing, update)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Reject ids that are empty or could escape the workspace root.
pub fn validate_project_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(LedgerError::Validation("project id is empty".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LedgerError::Validation(format!(
            "project id '{id}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Filesystem root of all projects.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an existing project.
    pub fn project_dir(&self, id: &str) -> Result<PathBuf> {
        validate_project_id(id)?;
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(LedgerError::NotFound(format!("project '{id}'")));
        }
        Ok(dir)
    }

    pub fn create_project(&self, id: &str, meta: Map<String, Value>) -> Result<ProjectManifest> {
        validate_project_id(id)?;
        fs::create_dir_all(&self.root)?;
        let dir = self.root.join(id);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LedgerError::Validation(format!(
                    "project '{id}' already exists"
                )));
            }
            Err(e) => return Err(LedgerError::Io(e)),
        }
        fs::create_dir_all(dir.join(SNAPSHOTS_DIR))?;

        let mut manifest = ProjectManifest::new(id, meta);
        manifest.audit.push(AuditEntry::new(
            None,
            AuditAction::ProjectCreated,
            Value::Null,
        ));
        self.save_manifest(id, &manifest)?;
        info!(project = id, "Project created");
        Ok(manifest)
    }

    /// Project ids, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::Io(e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_project_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load the manifest. A project without one gets a fresh manifest; a
    /// manifest that fails to parse is an error, never silently replaced.
    pub fn load_manifest(&self, id: &str) -> Result<ProjectManifest> {
        let path = self.project_dir(id)?.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => ProjectManifest::from_bytes(&bytes).map_err(|e| {
                LedgerError::Serialization(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(ProjectManifest::new(id, Map::new()))
            }
            Err(e) => Err(LedgerError::Io(e)),
        }
    }

    /// Write the manifest to a temporary file and rename it into place.
    pub fn save_manifest(&self, id: &str, manifest: &ProjectManifest) -> Result<()> {
        let dir = self.project_dir(id)?;
        let bytes = manifest.to_bytes()?;
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        debug!(project = id, bytes = bytes.len(), "Manifest saved");
        Ok(())
    }

    fn modify<T>(&self, id: &str, f: impl FnOnce(&mut ProjectManifest) -> T) -> Result<T> {
        let mut manifest = self.load_manifest(id)?;
        let out = f(&mut manifest);
        self.save_manifest(id, &manifest)?;
        Ok(out)
    }

    /// Deep-merge `patch` into the project metadata and return the result.
    /// The project id itself cannot be changed.
    pub fn update_meta(&self, id: &str, patch: Map<String, Value>) -> Result<Map<String, Value>> {
        self.modify(id, |m| {
            let mut meta = deep_merge(std::mem::take(&mut m.meta), patch);
            meta.insert("project_id".into(), Value::String(id.to_string()));
            m.meta = meta;
            m.audit.push(AuditEntry::new(
                None,
                AuditAction::MetaUpdated,
                Value::Null,
            ));
            m.meta.clone()
        })
    }

    pub fn register_snapshot(&self, id: &str, record: SnapshotRecord) -> Result<()> {
        self.modify(id, |m| m.snapshots.push(record))
    }

    pub fn register_chain_tx(&self, id: &str, record: ChainRecord) -> Result<()> {
        self.modify(id, |m| m.chain.push(record))
    }

    pub fn append_audit(&self, id: &str, entry: AuditEntry) -> Result<()> {
        self.modify(id, |m| m.audit.push(entry))
    }

    /// `snapshots/<step dir>` of a project, created if missing.
    pub fn snapshot_dir(&self, id: &str, step: Step) -> Result<PathBuf> {
        let dir = self
            .project_dir(id)?
            .join(SNAPSHOTS_DIR)
            .join(step.dir_name());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Resolve a snapshot by step and file name, refusing anything that is
    /// not a plain file name.
    pub fn snapshot_path(&self, id: &str, step: Step, file_name: &str) -> Result<PathBuf> {
        let plain = Path::new(file_name)
            .file_name()
            .is_some_and(|n| n == file_name);
        if !plain || file_name.starts_with('.') {
            return Err(LedgerError::Validation(format!(
                "invalid snapshot file name '{file_name}'"
            )));
        }
        Ok(self
            .project_dir(id)?
            .join(SNAPSHOTS_DIR)
            .join(step.dir_name())
            .join(file_name))
    }

    /// Path of `path` relative to the project directory, `/`-separated.
    /// Existing files are resolved first, so `.`/`..` and symlinked roots
    /// yield the same key as the path recorded at capture.
    pub fn relative_path(&self, id: &str, path: &Path) -> Result<String> {
        let dir = self.project_dir(id)?;
        let (dir, path) = match (fs::canonicalize(&dir), fs::canonicalize(path)) {
            (Ok(dir), Ok(path)) => (dir, path),
            _ => (dir, path.to_path_buf()),
        };
        let rel = path.strip_prefix(&dir).map_err(|_| {
            LedgerError::Validation(format!("{} is outside project '{id}'", path.display()))
        })?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("projects"));
        assert!(ws.list_projects().unwrap().is_empty());

        ws.create_project("beta", Map::new()).unwrap();
        let manifest = ws
            .create_project("alpha", meta(json!({"project_name": "HEK KO", "owner": "lab"})))
            .unwrap();
        assert_eq!(manifest.meta["project_id"], "alpha");
        assert_eq!(manifest.meta["project_name"], "HEK KO");
        assert_eq!(manifest.meta["status"], "draft");
        assert_eq!(manifest.audit[0].action, AuditAction::ProjectCreated);

        assert_eq!(ws.list_projects().unwrap(), vec!["alpha", "beta"]);
        assert!(ws.root().join("alpha").join(SNAPSHOTS_DIR).is_dir());
        assert_eq!(ws.load_manifest("alpha").unwrap(), manifest);
    }

    #[test]
    fn test_invalid_and_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        for bad in ["", "../escape", "a b", "x/y", "."] {
            assert!(
                matches!(ws.create_project(bad, Map::new()), Err(LedgerError::Validation(_))),
                "{bad:?} accepted"
            );
        }
        ws.create_project("p1", Map::new()).unwrap();
        assert!(matches!(
            ws.create_project("p1", Map::new()),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ws.load_manifest("missing"),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_meta_deep_merges() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.create_project(
            "p1",
            meta(json!({"protocol": {"version": 1, "owner": "a"}, "status": "draft"})),
        )
        .unwrap();

        let merged = ws
            .update_meta(
                "p1",
                meta(json!({"protocol": {"version": 2}, "status": "active", "project_id": "other"})),
            )
            .unwrap();
        assert_eq!(merged["protocol"], json!({"version": 2, "owner": "a"}));
        assert_eq!(merged["status"], "active");
        assert_eq!(merged["project_id"], "p1");

        let manifest = ws.load_manifest("p1").unwrap();
        assert_eq!(manifest.meta, merged);
        assert_eq!(manifest.audit.last().unwrap().action, AuditAction::MetaUpdated);
    }

    #[test]
    fn test_register_records() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.create_project("p1", Map::new()).unwrap();
        let hash = ContentHash::of(b"snap");

        ws.register_snapshot(
            "p1",
            SnapshotRecord {
                step: Step::Design,
                path: "snapshots/design/p1_1_abc.json".into(),
                content_hash: hash,
                timestamp_unix: 1,
            },
        )
        .unwrap();
        ws.register_chain_tx(
            "p1",
            ChainRecord {
                step: Step::Design,
                tx_hash: "0xfeed".into(),
                content_hash: hash,
                entry_id: 3,
                metadata_uri: "file:///x".into(),
                block_number: Some(9),
                anchored_at: Utc::now(),
            },
        )
        .unwrap();
        ws.append_audit(
            "p1",
            AuditEntry::new(Some(Step::Design), AuditAction::Anchored, json!({"entry_id": 3})),
        )
        .unwrap();

        let manifest = ws.load_manifest("p1").unwrap();
        assert_eq!(manifest.snapshots.len(), 1);
        assert_eq!(manifest.chain_record_for(&hash).unwrap().entry_id, 3);
        assert_eq!(
            manifest.snapshot_record_for("snapshots/design/p1_1_abc.json").map(|r| r.content_hash),
            Some(hash)
        );
        assert!(manifest.snapshot_record_for("snapshots/design/p1_2_abc.json").is_none());
        assert_eq!(manifest.audit.len(), 2);
        assert!(!ws.root().join("p1").join("manifest.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.create_project("p1", Map::new()).unwrap();
        fs::write(dir.path().join("p1").join(MANIFEST_FILE), b"{not json").unwrap();
        assert!(matches!(
            ws.load_manifest("p1"),
            Err(LedgerError::Serialization(_))
        ));
    }

    #[test]
    fn test_snapshot_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.create_project("p1", Map::new()).unwrap();

        let step_dir = ws.snapshot_dir("p1", Step::SeedBank).unwrap();
        assert!(step_dir.ends_with("p1/snapshots/seed_bank"));
        assert!(step_dir.is_dir());

        let path = ws.snapshot_path("p1", Step::SeedBank, "p1_1_abc.json").unwrap();
        assert_eq!(path, step_dir.join("p1_1_abc.json"));
        assert_eq!(
            ws.relative_path("p1", &path).unwrap(),
            "snapshots/seed_bank/p1_1_abc.json"
        );
        fs::write(&path, b"{}").unwrap();
        let roundabout = step_dir.join("..").join("seed_bank").join("p1_1_abc.json");
        assert_eq!(
            ws.relative_path("p1", &roundabout).unwrap(),
            "snapshots/seed_bank/p1_1_abc.json"
        );
        assert!(matches!(
            ws.relative_path("p1", dir.path()),
            Err(LedgerError::Validation(_))
        ));
        assert!(ws.snapshot_path("p1", Step::SeedBank, "../manifest.json").is_err());
        assert!(ws.snapshot_path("p1", Step::SeedBank, "..").is_err());
    }
}
