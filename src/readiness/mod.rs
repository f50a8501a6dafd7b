/// Per-step readiness checks run before a snapshot is anchored.
///
/// Issues block anchoring (unless forced); warnings are informational.
use serde::Serialize;
use serde_json::{Map, Value};

use crate::snapshot::Step;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Evaluate the form fields of a snapshot for `step`.
pub fn evaluate(step: Step, fields: &Map<String, Value>) -> Readiness {
    let mut r = Readiness::default();
    match step {
        Step::Design => design(fields, &mut r),
        Step::Delivery => delivery(fields, &mut r),
        Step::Assessment => assessment(fields, &mut r),
        Step::Screening => screening(fields, &mut r),
        Step::SeedBank => seed_bank(fields, &mut r),
        _ => {
            if fields.is_empty() {
                r.issue("Record at least one field before anchoring.");
            }
        }
    }
    r
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> Vec<&'a Map<String, Value>> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn object<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    obj.get(key).and_then(Value::as_object)
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

fn label<'a>(obj: &'a Map<String, Value>, keys: &[&str], fallback: &'a str) -> &'a str {
    keys.iter()
        .map(|k| str_field(obj, k))
        .find(|v| !v.is_empty())
        .unwrap_or(fallback)
}

fn has_attachments(fields: &Map<String, Value>) -> bool {
    truthy(fields.get("attachments"))
}

fn normalized_sequence(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_ascii_uppercase()
}

fn design(fields: &Map<String, Value>, r: &mut Readiness) {
    let guides = array(fields, "selected_guides");
    if guides.is_empty() {
        r.issue("At least one guide must be recorded.");
    }
    for guide in guides {
        let id = label(guide, &["id"], "guide");
        let seq = normalized_sequence(str_field(guide, "sequence"));
        let len = seq.chars().count();
        if !(19..=24).contains(&len) {
            r.issue(format!("{id}: guide length {len} nt (expected 19-24 nt)."));
        }
        let mut invalid: Vec<char> = seq
            .chars()
            .filter(|c| !matches!(c, 'A' | 'C' | 'G' | 'T' | 'U' | 'N'))
            .collect();
        invalid.sort_unstable();
        invalid.dedup();
        if !invalid.is_empty() {
            r.issue(format!("{id}: guide contains invalid bases {invalid:?}."));
        }
        if str_field(guide, "pam").trim().is_empty() {
            r.warn(format!("{id}: PAM not specified."));
        }
    }

    let primers = array(fields, "primer_pairs");
    if primers.is_empty() {
        r.issue("Enter at least one primer pair.");
    }
    for primer in primers {
        let name = label(primer, &["name"], "Primer pair");
        if str_field(primer, "forward").trim().is_empty()
            || str_field(primer, "reverse").trim().is_empty()
        {
            r.issue(format!("{name}: forward and reverse sequences are required."));
        }
    }

    let intent = object(fields, "mutation")
        .map(|m| str_field(m, "edit_intent"))
        .unwrap_or_default();
    if matches!(intent, "SNP-KI" | "BaseEdit" | "PrimeEdit") {
        let donor = object(fields, "donor").map(|d| str_field(d, "sequence")).unwrap_or_default();
        if donor.is_empty() {
            r.issue(format!("{intent}: donor sequence is required for this intent."));
        } else if normalized_sequence(donor).len() < 60 {
            r.warn("Donor sequence is shorter than 60 nt; confirm protocol alignment.");
        }
    }

    if !has_attachments(fields) {
        r.warn("No design attachments uploaded.");
    }
}

fn valid_lot(lot: &str) -> bool {
    lot.len() >= 4
        && lot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn delivery(fields: &Map<String, Value>, r: &mut Readiness) {
    let components = array(fields, "rnp_components");
    if components.is_empty() {
        r.issue("List the RNP/mix components (Cas9, sgRNA, donor, buffers).");
    } else {
        if str_field(fields, "delivery_goal") == "RNP" {
            let has = |kind: &str| {
                components
                    .iter()
                    .any(|c| str_field(c, "component_type") == kind)
            };
            if !has("Cas9") {
                r.issue("Add a Cas9 component for RNP delivery.");
            }
            if !has("sgRNA") {
                r.issue("Add at least one sgRNA component for RNP delivery.");
            }
        }
        for comp in &components {
            let name = label(comp, &["name", "component_type"], "component");
            let lot = str_field(comp, "lot_number").trim();
            if lot.is_empty() {
                r.warn(format!("{name}: lot number missing."));
            } else if !valid_lot(lot) {
                r.warn(format!("{name}: lot '{lot}' contains unsupported characters."));
            }
            if comp.get("concentration").is_none_or(Value::is_null) {
                r.warn(format!("{name}: concentration not recorded."));
            }
        }
    }

    if number(fields, "total_cells").unwrap_or(0.0) <= 0.0 {
        r.issue("Total cells must be greater than zero.");
    }
    if number(fields, "viability_percent").is_some_and(|v| v < 50.0) {
        r.warn("Viability is below 50%; confirm this is expected.");
    }
    if !has_attachments(fields) {
        r.warn("No delivery attachments provided.");
    }
}

fn assessment(fields: &Map<String, Value>, r: &mut Readiness) {
    let attachments = object(fields, "attachments");
    let attached = |key: &str| attachments.is_some_and(|a| a.contains_key(key));

    match str_field(fields, "assay_type") {
        "Sanger-Indel" => {
            let has_readout = number(fields, "total_indel_pct").is_some()
                || number(fields, "ki_pct").is_some()
                || truthy(fields.get("top_indels"));
            if !has_readout {
                r.issue("Provide at least one Sanger readout (total indel %, KI %, or indel table).");
            }
            if !attached("tool_result") {
                r.warn("No tool output attached.");
            }
        }
        "PCR-Genotyping" => {
            let pcr = object(fields, "pcr");
            if !pcr.is_some_and(|p| truthy(p.get("observed_bands_bp"))) {
                r.issue("Record observed PCR bands to document screening outcome.");
            }
            let expected =
                pcr.is_some_and(|p| number(p, "wt_bp").is_some() || number(p, "edited_bp").is_some());
            if !expected {
                r.warn("Expected PCR band sizes not provided.");
            }
            if !attached("gel_image") {
                r.warn("Gel/band image not attached.");
            }
        }
        _ => {}
    }

    if !has_attachments(fields) {
        r.warn("No assessment attachments uploaded.");
    }
    if !truthy(fields.get("decision")) {
        r.issue("Assessment decision is required.");
    }
}

fn screening(fields: &Map<String, Value>, r: &mut Readiness) {
    let positives: Vec<&str> = fields
        .get("positives")
        .and_then(Value::as_array)
        .map(|p| p.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let clones = array(fields, "clones");
    if clones.is_empty() {
        r.issue("Log at least one clone screening result.");
    }
    for clone in clones {
        let id = label(clone, &["clone_id"], "Clone");
        let assay = str_field(clone, "assay");
        if matches!(assay, "PCR" | "PCR+Sanger") {
            let pcr = object(clone, "pcr");
            let observed = pcr.is_some_and(|p| truthy(p.get("observed_bands_bp")));
            if !observed {
                r.issue(format!("{id}: record observed PCR bands."));
            } else if !pcr.is_some_and(|p| truthy(p.get("gel_image_path"))) {
                r.warn(format!("{id}: add gel image for PCR confirmation."));
            }
        }
        if matches!(assay, "Sanger" | "PCR+Sanger")
            && !object(clone, "sanger").is_some_and(|s| truthy(s.get("result_file")))
        {
            r.warn(format!("{id}: attach Sanger trace/analysis output."));
        }
        if str_field(clone, "call").eq_ignore_ascii_case("positive") && !positives.contains(&id) {
            r.warn(format!("{id} marked Positive but not included in positives list."));
        }
    }

    if positives.is_empty() {
        r.warn("Mark at least one clone as positive or note rationale in comments.");
    }
    if !has_attachments(fields) {
        r.warn("No supplemental attachments uploaded.");
    }
}

fn seed_bank(fields: &Map<String, Value>, r: &mut Readiness) {
    if !truthy(fields.get("seed_bank_batch_id")) || !truthy(fields.get("freeze_date")) {
        r.issue("Seed bank batch ID and freeze date are required.");
    }

    let clones = array(fields, "clones");
    if clones.is_empty() {
        r.issue("Add at least one clone to the seed bank.");
    }
    for clone in clones {
        let id = label(clone, &["clone_id"], "Clone");
        if !truthy(clone.get("storage_location")) {
            r.issue(format!("{id}: storage location is required."));
        }
        if number(clone, "vial_count").unwrap_or(0.0) <= 0.0 {
            r.issue(format!("{id}: vial count must be greater than zero."));
        }
        if !truthy(clone.get("cells_per_vial")) {
            r.warn(format!("{id}: cells per vial not recorded."));
        }
        if truthy(clone.get("dna_pellet_saved")) && !truthy(clone.get("dna_pellet_location")) {
            r.warn(format!("{id}: DNA pellet saved but location not recorded."));
        }
    }

    if !has_attachments(fields) {
        r.warn("No seed bank attachments uploaded.");
    }
    if !truthy(fields.get("downstream_qc_plan")) {
        r.warn("Downstream QC plan not specified.");
    }
}
