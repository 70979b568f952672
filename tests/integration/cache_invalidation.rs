//! Cache and manifest invalidation across package activation changes.

use super::test_utils::{dir_package, overlay_file, test_engine, VecProvider};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_deactivated_package_stops_contributing() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let a = dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]);
    let b = dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]);

    let both = VecProvider {
        packages: vec![a.clone(), b.clone()],
    };
    let summary = engine.resolve(&both, true).unwrap();
    assert_eq!(summary.total_conflicts, 1);
    assert!(overlay_file(&dir, "s.json").exists());

    // Package b deactivates: the conflict disappears, the pruned output is
    // removed, and b's manifest file is gone.
    engine.invalidate_package("b");
    let only_a = VecProvider { packages: vec![a] };
    let summary = engine.resolve(&only_a, true).unwrap();
    assert_eq!(summary.total_conflicts, 0);
    assert!(!overlay_file(&dir, "s.json").exists());
    assert!(!dir.path().join("cache/manifests/b.json").exists());
}

#[test]
fn test_inactive_handle_excluded_from_detection() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let a = dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]);
    let mut b = dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]);
    b.is_active = false;

    let provider = VecProvider {
        packages: vec![a, b],
    };
    let conflicts = engine.detect(&provider).unwrap();
    assert!(conflicts.is_empty());
}

#[test]
fn test_manifests_persist_across_engine_restarts() {
    let dir = TempDir::new().unwrap();
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    {
        let engine = test_engine(&dir);
        engine.resolve(&provider, true).unwrap();
    }
    assert!(dir.path().join("cache/manifests/a.json").exists());
    assert!(dir.path().join("cache/manifests/b.json").exists());

    // A fresh engine over the same cache root reuses everything.
    let engine = test_engine(&dir);
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 0);
    assert_eq!(summary.skipped_count, 1);
}

#[test]
fn test_clear_caches_then_full_rebuild() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    engine.resolve(&provider, true).unwrap();

    engine.clear_caches().unwrap();
    assert!(!overlay_file(&dir, "s.json").exists());
    assert!(!dir.path().join("cache/manifests/a.json").exists());
    assert!(!dir.path().join("cache/resolution_index.json").exists());

    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    assert!(overlay_file(&dir, "s.json").exists());
}

#[test]
fn test_deleted_overlay_output_is_rewritten() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    engine.resolve(&provider, true).unwrap();

    // Someone deletes the merged file out from under the index: the cached
    // record no longer counts as reusable.
    fs::remove_file(overlay_file(&dir, "s.json")).unwrap();
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    assert!(overlay_file(&dir, "s.json").exists());
}

#[test]
fn test_corrupt_index_rebuilt_from_scratch() {
    let dir = TempDir::new().unwrap();
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    {
        let engine = test_engine(&dir);
        engine.resolve(&provider, true).unwrap();
    }
    fs::write(dir.path().join("cache/resolution_index.json"), "garbage").unwrap();

    let engine = test_engine(&dir);
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    assert_eq!(summary.skipped_count, 0);

    // The repaired index is valid JSON again.
    let raw = fs::read_to_string(dir.path().join("cache/resolution_index.json")).unwrap();
    let _: serde_json::Value = serde_json::from_str(&raw).unwrap();
}
