/// Immutable stage snapshots.
///
/// A snapshot is one submission of a workflow stage's form data. It is
/// serialized canonically, hashed, and written exactly once:
///
/// ```text
/// form fields + step + project + timestamp
///        │
///        ▼ canonical JSON (sorted keys, compact)
///    bytes ──▶ SHA-256 ──▶ <project>_<ts>_<hash[..12]>.json
/// ```
///
/// The hash of those bytes is what gets anchored on-chain.
pub mod canonical;
pub mod writer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};

/// Keys the snapshot envelope owns; form fields may not use them.
pub const RESERVED_KEYS: [&str; 3] = ["step", "project_id", "timestamp_unix"];

/// A named stage of the gene-editing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Design,
    Delivery,
    Assessment,
    Cloning,
    Screening,
    PreliminaryQc,
    SeedBank,
    MasterBankRegistry,
    EditingVerification,
    FormZ,
    LagesoCompliance,
    WorkLog,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Design,
        Step::Delivery,
        Step::Assessment,
        Step::Cloning,
        Step::Screening,
        Step::PreliminaryQc,
        Step::SeedBank,
        Step::MasterBankRegistry,
        Step::EditingVerification,
        Step::FormZ,
        Step::LagesoCompliance,
        Step::WorkLog,
    ];

    /// Label submitted on-chain as the `step` argument of `log`.
    pub fn label(&self) -> &'static str {
        match self {
            Step::Design => "Design",
            Step::Delivery => "Delivery",
            Step::Assessment => "Assessment",
            Step::Cloning => "Cloning",
            Step::Screening => "Screening",
            Step::PreliminaryQc => "Preliminary QC",
            Step::SeedBank => "Seed Bank",
            Step::MasterBankRegistry => "Master Bank Registry",
            Step::EditingVerification => "Editing Verification (MB) Report",
            Step::FormZ => "Form Z",
            Step::LagesoCompliance => "LAGESO Compliance",
            Step::WorkLog => "GenTAufzV Work Log",
        }
    }

    /// Directory under `snapshots/` holding this stage's files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Step::Design => "design",
            Step::Delivery => "delivery",
            Step::Assessment => "assessment",
            Step::Cloning => "cloning",
            Step::Screening => "screening",
            Step::PreliminaryQc => "preliminary_qc",
            Step::SeedBank => "seed_bank",
            Step::MasterBankRegistry => "master_bank_registry",
            Step::EditingVerification => "editing_verification",
            Step::FormZ => "form_z",
            Step::LagesoCompliance => "lageso",
            Step::WorkLog => "gentaaufzv",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Step {
    type Err = LedgerError;

    /// Accepts the on-chain label or the directory name, ignoring case.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Step::ALL
            .into_iter()
            .find(|step| {
                step.label().eq_ignore_ascii_case(wanted)
                    || step.dir_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| LedgerError::Validation(format!("unknown step '{wanted}'")))
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// One stage submission: form fields plus the envelope keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub step: Step,
    pub project_id: String,
    pub timestamp_unix: i64,
    pub fields: Map<String, Value>,
}

impl Snapshot {
    /// Build a snapshot, rejecting form fields that shadow envelope keys.
    pub fn new(
        step: Step,
        project_id: &str,
        timestamp_unix: i64,
        fields: Map<String, Value>,
    ) -> Result<Self> {
        if let Some(key) = RESERVED_KEYS.iter().find(|k| fields.contains_key(**k)) {
            return Err(LedgerError::Validation(format!(
                "form field '{key}' is reserved"
            )));
        }
        Ok(Self {
            step,
            project_id: project_id.to_string(),
            timestamp_unix,
            fields,
        })
    }

    /// The full JSON object written to disk.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("step".into(), Value::String(self.step.label().into()));
        map.insert("project_id".into(), Value::String(self.project_id.clone()));
        map.insert("timestamp_unix".into(), Value::from(self.timestamp_unix));
        Value::Object(map)
    }

    /// Canonical serialization; the input of the content hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::to_canonical_bytes(&self.to_value())
    }

    pub fn content_hash(&self) -> Result<ContentHash> {
        Ok(ContentHash::of(&self.canonical_bytes()?))
    }

    /// Parse a snapshot file back into its envelope and fields.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(LedgerError::Serialization(
                "snapshot must be a JSON object".into(),
            ));
        };

        let step = match map.remove("step") {
            Some(Value::String(label)) => label.parse()?,
            _ => return Err(LedgerError::Serialization("snapshot has no step".into())),
        };
        let project_id = match map.remove("project_id") {
            Some(Value::String(id)) => id,
            _ => {
                return Err(LedgerError::Serialization(
                    "snapshot has no project_id".into(),
                ))
            }
        };
        let timestamp_unix = map
            .remove("timestamp_unix")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| LedgerError::Serialization("snapshot has no timestamp_unix".into()))?;

        Ok(Self {
            step,
            project_id,
            timestamp_unix,
            fields: map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_step_parsing() {
        assert_eq!("Design".parse::<Step>().unwrap(), Step::Design);
        assert_eq!("preliminary qc".parse::<Step>().unwrap(), Step::PreliminaryQc);
        assert_eq!("seed_bank".parse::<Step>().unwrap(), Step::SeedBank);
        assert!("Sequencing".parse::<Step>().is_err());
        for step in Step::ALL {
            assert_eq!(step.dir_name().parse::<Step>().unwrap(), step);
            assert_eq!(step.label().parse::<Step>().unwrap(), step);
        }
    }

    #[test]
    fn test_reserved_keys_rejected() {
        let err = Snapshot::new(Step::Design, "p1", 1, fields(json!({"step": "Cloning"})));
        assert!(matches!(err, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_canonical_bytes_include_envelope() {
        let snapshot =
            Snapshot::new(Step::Design, "p1", 1700000000, fields(json!({"voltage": 1200}))).unwrap();
        let bytes = snapshot.canonical_bytes().unwrap();
        assert_eq!(
            bytes,
            br#"{"project_id":"p1","step":"Design","timestamp_unix":1700000000,"voltage":1200}"#
        );
    }

    #[test]
    fn test_hash_depends_only_on_content() {
        let a = Snapshot::new(
            Step::Delivery,
            "p1",
            42,
            fields(json!({"total_cells": 250000, "viability_percent": 91.5})),
        )
        .unwrap();
        let b = Snapshot::new(
            Step::Delivery,
            "p1",
            42,
            fields(json!({"viability_percent": 91.5, "total_cells": 250000})),
        )
        .unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

        let c = Snapshot::new(Step::Delivery, "p1", 43, a.fields.clone()).unwrap();
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn test_parse_back() {
        let snapshot = Snapshot::new(
            Step::Screening,
            "p9",
            7,
            fields(json!({"clones": [{"clone_id": "C1"}]})),
        )
        .unwrap();
        let parsed = Snapshot::from_bytes(&snapshot.canonical_bytes().unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_parse_rejects_missing_envelope() {
        assert!(Snapshot::from_bytes(br#"{"voltage":1}"#).is_err());
        assert!(Snapshot::from_bytes(b"[1,2]").is_err());
    }
}
