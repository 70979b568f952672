//! Archive-backed packages end to end: tar packages conflicting with
//! directory packages, archive-only runs, and unreadable archives.

use super::test_utils::{dir_package, overlay_file, tar_package, test_engine, VecProvider};
use std::fs;
use tempfile::TempDir;
use weft::types::{PackageHandle, StorageKind};

#[test]
fn test_archive_conflicts_with_directory_package() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            tar_package(dir.path(), "packed", &[("settings/game.json", r#"{"speed":1}"#)]),
            dir_package(dir.path(), "loose", &[("settings/game.json", r#"{"gravity":9.8}"#)]),
        ],
    };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);

    let merged: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(overlay_file(&dir, "settings/game.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(merged["speed"], 1);
    assert_eq!(merged["gravity"], 9.8);
}

#[test]
fn test_two_archives_record_merge() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            tar_package(
                dir.path(),
                "alpha",
                &[("d/units.jsonl", "{\"name\":\"scout\"}\n{\"name\":\"medic\"}\n")],
            ),
            tar_package(
                dir.path(),
                "beta",
                &[("d/units.jsonl", "{\"name\":\"scout\"}\n{\"name\":\"sniper\"}\n")],
            ),
        ],
    };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);

    let merged = fs::read_to_string(overlay_file(&dir, "d/units.jsonl")).unwrap();
    assert_eq!(merged.lines().count(), 3);
    assert!(merged.contains("\"sniper\""));
}

#[test]
fn test_archive_entries_outside_allow_list_ignored() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            tar_package(
                dir.path(),
                "alpha",
                &[("tex/wall.dds", "binary-a"), ("s.json", r#"{"x":1}"#)],
            ),
            tar_package(
                dir.path(),
                "beta",
                &[("tex/wall.dds", "binary-b"), ("s.json", r#"{"y":2}"#)],
            ),
        ],
    };
    let conflicts = engine.detect(&provider).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts.keys().all(|p| p.as_str() == "/s.json"));
}

#[test]
fn test_unreadable_archive_contributes_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let missing = PackageHandle {
        name: "ghost".to_string(),
        storage: StorageKind::Archive {
            archive_path: dir.path().join("ghost.tar"),
        },
        is_active: true,
        declared_hashes: None,
    };
    let provider = VecProvider {
        packages: vec![
            missing,
            dir_package(dir.path(), "loose", &[("s.json", r#"{"x":1}"#)]),
        ],
    };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.total_conflicts, 0);
    assert_eq!(summary.failed_count, 0);
}

#[test]
fn test_archive_manifest_reused_until_archive_replaced() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            tar_package(dir.path(), "packed", &[("s.json", r#"{"x":1}"#)]),
            dir_package(dir.path(), "loose", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    engine.resolve(&provider, true).unwrap();
    assert_eq!(engine.resolve(&provider, true).unwrap().skipped_count, 1);

    // Replacing the tar bumps its mtime: the manifest rebuilds and the merge
    // reruns with the new content.
    let replaced = tar_package(dir.path(), "packed", &[("s.json", r#"{"x":42}"#)]);
    let future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    fs::File::options()
        .write(true)
        .open(dir.path().join("packed.tar"))
        .unwrap()
        .set_modified(future)
        .unwrap();
    engine.invalidate_package("packed");

    let provider = VecProvider {
        packages: vec![
            replaced,
            dir_package(dir.path(), "loose", &[("s.json", r#"{"y":2}"#)]),
        ],
    };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1);
    let merged: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(overlay_file(&dir, "s.json")).unwrap()).unwrap();
    assert_eq!(merged["x"], 42);
}
