//! Format-Aware Merge Engine
//!
//! Produces one merged byte sequence for N conflicting byte sequences at the
//! same virtual path. Per-path state machine with three terminal outcomes:
//!
//! - `CopiedIdentical` — all contributions were equivalent; first copied verbatim
//! - `Merged` — a format-aware strategy produced combined bytes
//! - `Failed` — no contributor could be read or parsed
//!
//! Dispatch by extension: script files go to the block-oriented merge,
//! structured documents are sampled for record framing (many top-level objects
//! means a tagged-record union merge, otherwise a recursive deep merge).
//!
//! Merges are heuristic but deterministic: the same contributor contents in
//! the same order always produce the same bytes.

pub mod deep;
pub mod records;
pub mod script;

use crate::config::EngineConfig;
use crate::store::ContentStore;
use crate::types::{Hash, NormalizedPath};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One readable contribution to a conflicting path.
pub struct MergeInput {
    pub package: String,
    pub hash: Hash,
    pub bytes: Arc<Vec<u8>>,
}

/// Terminal outcome for one conflicting path.
pub enum MergeOutcome {
    /// Format-aware merge produced fresh bytes.
    Merged(Vec<u8>),
    /// All contributions equivalent; first contributor copied verbatim.
    CopiedIdentical(Vec<u8>),
    /// No contributor yielded usable content.
    Failed,
}

/// How many bytes of the head are sampled for record framing.
const DETECTION_SAMPLE: usize = 4096;

/// Merge all contributions for one path.
pub fn merge_path(
    path: &NormalizedPath,
    inputs: &[MergeInput],
    config: &EngineConfig,
    store: &ContentStore,
) -> MergeOutcome {
    if inputs.is_empty() {
        return MergeOutcome::Failed;
    }

    // Identical-content fast path: equal hashes, or equal line sequences for
    // text that differs only in line endings. Never reaches format dispatch.
    if inputs.iter().all(|i| i.hash == inputs[0].hash) || all_lines_identical(inputs) {
        return MergeOutcome::CopiedIdentical(inputs[0].bytes.as_ref().clone());
    }

    let extension = path.extension().unwrap_or_default();
    if config.is_script_extension(&extension) {
        return match script::merge_scripts(inputs, config) {
            Some(bytes) => MergeOutcome::Merged(bytes),
            None => MergeOutcome::Failed,
        };
    }

    merge_structured(path, inputs, store)
}

fn merge_structured(
    path: &NormalizedPath,
    inputs: &[MergeInput],
    store: &ContentStore,
) -> MergeOutcome {
    let record_framed = inputs
        .iter()
        .filter_map(|i| std::str::from_utf8(head(&i.bytes)).ok())
        .any(|h| count_top_level_objects(h) > 1);

    if record_framed {
        match records::merge_records(inputs) {
            Some(bytes) => return MergeOutcome::Merged(bytes),
            None => {
                warn!(path = %path, "no contributor parsed as records");
                return MergeOutcome::Failed;
            }
        }
    }

    // Single-document deep merge, pairwise in contributor order.
    let mut parsed: Vec<Arc<Value>> = Vec::new();
    for input in inputs {
        match parse_cached(store, &input.hash, &input.bytes) {
            Some(value) => parsed.push(value),
            None => {
                warn!(path = %path, package = %input.package, "malformed document excluded from merge");
            }
        }
    }
    if parsed.is_empty() {
        return MergeOutcome::Failed;
    }
    if parsed.len() == 1 {
        debug!(path = %path, "single parseable contributor, passing through");
        return MergeOutcome::Merged(serialize_document(&parsed[0]));
    }

    let mut merged = parsed[0].as_ref().clone();
    for overlay in &parsed[1..] {
        deep::deep_merge(&mut merged, overlay);
    }
    MergeOutcome::Merged(serialize_document(&merged))
}

/// Parse a document through the content-addressed parsed-document cache.
fn parse_cached(store: &ContentStore, hash: &Hash, bytes: &[u8]) -> Option<Arc<Value>> {
    if let Some(hit) = store.get_parsed(hash) {
        return Some(hit);
    }
    let value: Value = serde_json::from_slice(bytes).ok()?;
    Some(store.put_parsed(hash.clone(), value))
}

/// Deterministic document serialization: two-space indent, keys in the
/// insertion order the parsed documents established, trailing newline.
fn serialize_document(value: &Value) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(value).unwrap_or_else(|_| b"null".to_vec());
    out.push(b'\n');
    out
}

fn head(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(DETECTION_SAMPLE)]
}

fn all_lines_identical(inputs: &[MergeInput]) -> bool {
    let first = match std::str::from_utf8(&inputs[0].bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let reference: Vec<&str> = first.lines().collect();
    inputs[1..].iter().all(|input| {
        std::str::from_utf8(&input.bytes)
            .map(|s| s.lines().eq(reference.iter().copied()))
            .unwrap_or(false)
    })
}

/// Count top-level brace-balanced object boundaries outside quoted strings.
/// More than one boundary in the head sample means record framing.
fn count_top_level_objects(sample: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut boundaries = 0usize;
    for ch in sample.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    boundaries += 1;
                }
            }
            _ => {}
        }
    }
    boundaries
}
