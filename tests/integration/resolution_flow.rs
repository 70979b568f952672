//! End-to-end resolution runs: idempotence, debounce, version bumps, and
//! failure behavior.

use super::test_utils::{dir_package, overlay_file, test_config, test_engine, VecProvider};
use std::fs;
use tempfile::TempDir;
use weft::engine::Engine;
use weft::host::LoggingOverlayHost;
use weft::types::PathStatus;

#[test]
fn test_end_to_end_bindings_scenario() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(
                dir.path(),
                "base-controls",
                &[(
                    "settings/input.json",
                    r#"{"bindings":[{"control":"W","action":"forward"}]}"#,
                )],
            ),
            dir_package(
                dir.path(),
                "extra-controls",
                &[(
                    "settings/input.json",
                    r#"{"bindings":[{"control":"W","action":"forward"},{"control":"S","action":"back"}]}"#,
                )],
            ),
        ],
    };

    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    assert_eq!(summary.total_conflicts, 1);

    let merged: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(overlay_file(&dir, "settings/input.json")).unwrap())
            .unwrap();
    let bindings = merged["bindings"].as_array().unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0]["control"], "W");
    assert_eq!(bindings[0]["action"], "forward");
    assert_eq!(bindings[1]["control"], "S");
    assert_eq!(bindings[1]["action"], "back");
}

#[test]
fn test_idempotence_identical_bytes_and_zero_resolved() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("cfg/game.json", r#"{"speed":1,"flags":{"x":true}}"#)]),
            dir_package(dir.path(), "b", &[("cfg/game.json", r#"{"flags":{"y":false}}"#)]),
        ],
    };

    let first = engine.resolve(&provider, true).unwrap();
    assert_eq!(first.resolved_count, 1);
    let first_bytes = fs::read(overlay_file(&dir, "cfg/game.json")).unwrap();

    let second = engine.resolve(&provider, true).unwrap();
    assert_eq!(second.resolved_count, 0);
    assert_eq!(second.skipped_count, second.total_conflicts);
    let second_bytes = fs::read(overlay_file(&dir, "cfg/game.json")).unwrap();
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn test_changed_contributor_forces_remerge() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let a = dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]);
    let b = dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]);
    let provider = VecProvider {
        packages: vec![a.clone(), b.clone()],
    };
    engine.resolve(&provider, true).unwrap();

    // Rewrite package b's file; its manifest must go stale and the cached
    // resolution no longer match.
    fs::write(dir.path().join("b/s.json"), r#"{"y":3}"#).unwrap();
    filetime_bump(&dir.path().join("b/s.json"));
    engine.invalidate_package("b");

    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    let merged: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(overlay_file(&dir, "s.json")).unwrap()).unwrap();
    assert_eq!(merged["y"], 3);
}

#[test]
fn test_version_bump_nothing_skipped() {
    let dir = TempDir::new().unwrap();
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    {
        let engine = test_engine(&dir);
        assert_eq!(engine.resolve(&provider, true).unwrap().resolved_count, 1);
    }

    let engine = Engine::new(test_config(&dir), Box::new(LoggingOverlayHost))
        .unwrap()
        .with_index_version("bumped");
    let summary = engine.resolve(&provider, true).unwrap();
    assert!(summary.version_changed);
    assert_eq!(summary.skipped_count, 0);
    assert_eq!(summary.resolved_count, summary.total_conflicts);
}

#[test]
fn test_failed_merge_leaves_previous_output() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "a", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "b", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    engine.resolve(&provider, true).unwrap();
    let before = fs::read(overlay_file(&dir, "s.json")).unwrap();

    // Both contributors become malformed: the merge fails, but the previous
    // overlay output must survive.
    fs::write(dir.path().join("a/s.json"), "{{{ nope").unwrap();
    fs::write(dir.path().join("b/s.json"), "also invalid }").unwrap();
    filetime_bump(&dir.path().join("a/s.json"));
    filetime_bump(&dir.path().join("b/s.json"));
    engine.invalidate_package("a");
    engine.invalidate_package("b");

    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.failed_count, 1);
    assert_eq!(
        summary.per_path.values().filter(|s| **s == PathStatus::Failed).count(),
        1
    );
    assert_eq!(fs::read(overlay_file(&dir, "s.json")).unwrap(), before);
}

#[test]
fn test_unreadable_contributor_does_not_abort_run() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);

    // Package "a" declares hashes for two files, but broken.json turned into
    // a directory on disk after the declaration. The other conflict must
    // still resolve, and broken.json falls back to its readable contributor.
    let mut a = dir_package(dir.path(), "a", &[("fine.json", r#"{"x":1}"#)]);
    fs::create_dir(dir.path().join("a/broken.json")).unwrap();
    a.declared_hashes = Some(vec![
        (
            "fine.json".to_string(),
            weft::store::compute_hash(br#"{"x":1}"#),
        ),
        ("broken.json".to_string(), "0".repeat(64)),
    ]);
    let b = dir_package(
        dir.path(),
        "b",
        &[("fine.json", r#"{"y":2}"#), ("broken.json", r#"{"v":2}"#)],
    );

    let provider = VecProvider { packages: vec![a, b] };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.total_conflicts, 2);
    assert_eq!(summary.resolved_count, 2);

    let fine: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(overlay_file(&dir, "fine.json")).unwrap())
            .unwrap();
    assert_eq!(fine["x"], 1);
    assert_eq!(fine["y"], 2);
    // Only package b's copy of broken.json was readable; it passes through.
    let broken: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(overlay_file(&dir, "broken.json")).unwrap())
            .unwrap();
    assert_eq!(broken["v"], 2);
}

#[test]
fn test_per_path_statuses_reported() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(
                dir.path(),
                "a",
                &[("one.json", r#"{"x":1}"#), ("two.json", r#"{"x":1}"#)],
            ),
            dir_package(
                dir.path(),
                "b",
                &[("one.json", r#"{"y":2}"#), ("two.json", r#"{"y":2}"#)],
            ),
        ],
    };
    engine.resolve(&provider, true).unwrap();
    let second = engine.resolve(&provider, true).unwrap();
    assert_eq!(second.per_path.len(), 2);
    assert!(second.per_path.values().all(|s| *s == PathStatus::Skipped));
}

/// Ensure a rewritten file's mtime moves forward even on coarse-grained
/// filesystems, so manifest staleness triggers.
fn filetime_bump(path: &std::path::Path) {
    let future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(future).unwrap();
}
