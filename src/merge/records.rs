//! Tagged-record document merge.
//!
//! Handles multi-record formats: one JSON object per line, or a single JSON
//! array of objects. Records from different packages describing the same
//! logical entity rarely compare byte-equal (float noise, key order), so each
//! record gets a derived identity key and the merge is a union deduplicated
//! by identity, first-seen-wins in contributor order.
//!
//! Identity components come from fixed field-priority groups. Position and
//! rotation components are always formatted to 6 decimal places so
//! floating-point noise never splits one entity into two.

use crate::merge::MergeInput;
use crate::store::compute_hash;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::warn;

const NAME_FIELDS: &[&str] = &["name", "Name", "id", "Id", "ID"];
const TYPE_FIELDS: &[&str] = &["type", "Type", "class", "Class", "kind"];
const PARENT_FIELDS: &[&str] = &["parent", "Parent", "parentId", "parentName"];
const SHAPE_FIELDS: &[&str] = &["shape", "Shape", "mesh", "Mesh", "model"];
const ANNOTATION_FIELDS: &[&str] = &["annotation", "description", "desc", "text"];
const POSITION_FIELDS: &[&str] = &["pos", "position", "Position"];
const ROTATION_FIELDS: &[&str] = &["rot", "rotation", "dir"];
const SECONDARY_FIELDS: &[&str] = &["scale", "side", "layer", "group", "tag", "init"];

/// How many leading records establish the output key order.
const KEY_ORDER_SAMPLE: usize = 10;

/// Framing of a record document, preserved from the first parsed contributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Lines,
    Array,
}

/// Merge record-framed contributors. Returns `None` when no contributor
/// parses (the caller reports `Failed`).
pub fn merge_records(inputs: &[MergeInput]) -> Option<Vec<u8>> {
    let mut framing = None;
    let mut merged: Vec<Map<String, Value>> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for input in inputs {
        let Some((records, contributed_framing)) = parse_records(&input.bytes) else {
            warn!(package = %input.package, "malformed record document excluded from merge");
            continue;
        };
        framing.get_or_insert(contributed_framing);
        for record in records {
            let key = identity_key(&record);
            if seen.insert(key) {
                merged.push(record);
            }
        }
    }

    let framing = framing?;
    Some(serialize_records(&merged, framing))
}

/// Parse one contributor into records: a JSON array of objects, or one JSON
/// object per non-empty line. Any unparseable non-empty line makes the whole
/// contributor malformed.
fn parse_records(bytes: &[u8]) -> Option<(Vec<Map<String, Value>>, Framing)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed).ok()?;
        let records = values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        return Some((records, Framing::Array));
    }

    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            _ => return None,
        }
    }
    if records.is_empty() {
        return None;
    }
    Some((records, Framing::Lines))
}

/// Derive the identity key of one record.
///
/// Each field-priority group contributes at most one component (the first
/// matching field's formatted value). Found components are sorted
/// lexicographically and pipe-joined. A record matching no group falls back
/// to a canonical hash of all its `key=value` pairs sorted by key.
pub fn identity_key(record: &Map<String, Value>) -> String {
    let mut components: Vec<String> = Vec::new();

    for group in [
        NAME_FIELDS,
        TYPE_FIELDS,
        PARENT_FIELDS,
        SHAPE_FIELDS,
        ANNOTATION_FIELDS,
    ] {
        if let Some(value) = first_present(record, group) {
            components.push(format_component(value));
        }
    }
    if let Some(value) = first_present(record, POSITION_FIELDS) {
        components.push(format_numeric(value));
    }
    if let Some(value) = first_present(record, ROTATION_FIELDS) {
        components.push(format_numeric(value));
    }
    for field in SECONDARY_FIELDS {
        if let Some(value) = record.get(*field) {
            components.push(format_component(value));
        }
    }

    if components.is_empty() {
        return canonical_fallback(record);
    }
    components.sort();
    components.join("|")
}

fn first_present<'a>(record: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|f| record.get(*f))
}

fn format_component(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format a position/rotation value with every numeric component at 6
/// decimal places. Handles scalars and 3- or 6-component arrays.
fn format_numeric(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("{:.6}", n.as_f64().unwrap_or(0.0)),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::Number(n) => format!("{:.6}", n.as_f64().unwrap_or(0.0)),
                other => format_component(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => format_component(other),
    }
}

/// Canonical hash of all key=value pairs sorted by key.
fn canonical_fallback(record: &Map<String, Value>) -> String {
    let mut pairs: Vec<String> = record
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    pairs.sort();
    compute_hash(pairs.join("&").as_bytes())
}

/// Re-serialize merged records, preserving the key order observed in the
/// first [`KEY_ORDER_SAMPLE`] records; keys outside that order are appended
/// sorted.
fn serialize_records(records: &[Map<String, Value>], framing: Framing) -> Vec<u8> {
    let mut key_order: Vec<String> = Vec::new();
    for record in records.iter().take(KEY_ORDER_SAMPLE) {
        for key in record.keys() {
            if !key_order.iter().any(|k| k == key) {
                key_order.push(key.clone());
            }
        }
    }

    let lines: Vec<String> = records
        .iter()
        .map(|record| {
            let mut ordered = Map::new();
            for key in &key_order {
                if let Some(value) = record.get(key) {
                    ordered.insert(key.clone(), value.clone());
                }
            }
            let mut rest: Vec<&String> = record
                .keys()
                .filter(|k| !key_order.contains(k))
                .collect();
            rest.sort();
            for key in rest {
                ordered.insert(key.clone(), record[key].clone());
            }
            Value::Object(ordered).to_string()
        })
        .collect();

    let mut out = String::new();
    match framing {
        Framing::Lines => {
            for line in &lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        Framing::Array => {
            out.push_str("[\n");
            for (i, line) in lines.iter().enumerate() {
                out.push_str("  ");
                out.push_str(line);
                if i + 1 < lines.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str("]\n");
        }
    }
    out.into_bytes()
}
