//! Recursive deep merge for hierarchical key-value documents.
//!
//! Last-writer-wins, not a 3-way diff: for each key in the overlay, arrays
//! concatenate, objects recurse, anything else the overlay value replaces the
//! base value. Arrays under a key literally named `bindings` dedupe by their
//! entries' (`control`, `action`) pair, so two packages declaring the same
//! input binding yield one copy.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

const BINDINGS_KEY: &str = "bindings";
const BINDING_CONTROL: &str = "control";
const BINDING_ACTION: &str = "action";

/// Merge `overlay` into `base`, pairwise left-to-right semantics.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    let Value::Object(overlay_map) = overlay else {
        // Non-object overlay replaces the base wholesale.
        *base = overlay.clone();
        return;
    };
    let Value::Object(base_map) = base else {
        *base = overlay.clone();
        return;
    };

    for (key, overlay_value) in overlay_map {
        match (base_map.get_mut(key), overlay_value) {
            (Some(Value::Array(base_items)), Value::Array(overlay_items)) => {
                base_items.extend(overlay_items.iter().cloned());
                if key == BINDINGS_KEY {
                    dedup_bindings(base_items);
                }
            }
            (Some(base_value @ Value::Object(_)), Value::Object(_)) => {
                deep_merge(base_value, overlay_value);
            }
            _ => {
                base_map.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

/// Retain the first occurrence of each (`control`, `action`) pair. Entries
/// missing either sub-field dedupe by their full canonical value instead.
fn dedup_bindings(items: &mut Vec<Value>) {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    items.retain(|item| seen.insert(binding_key(item)));
}

fn binding_key(item: &Value) -> String {
    match (
        item.get(BINDING_CONTROL).and_then(Value::as_str),
        item.get(BINDING_ACTION).and_then(Value::as_str),
    ) {
        (Some(control), Some(action)) => format!("{}\u{1f}{}", control, action),
        _ => item.to_string(),
    }
}
