//! Format-aware merges exercised through full engine runs: tagged records,
//! deep key-value documents, and script block merges.

use super::test_utils::{dir_package, overlay_file, test_engine, VecProvider};
use std::fs;
use tempfile::TempDir;

fn run_two(dir: &TempDir, path: &str, a: &str, b: &str) -> String {
    let engine = test_engine(dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(dir.path(), "first", &[(path, a)]),
            dir_package(dir.path(), "second", &[(path, b)]),
        ],
    };
    let summary = engine.resolve(&provider, true).unwrap();
    assert_eq!(summary.resolved_count, 1, "expected one merged path");
    fs::read_to_string(overlay_file(dir, path)).unwrap()
}

#[test]
fn test_tagged_records_union_first_seen_wins() {
    let dir = TempDir::new().unwrap();
    let merged = run_two(
        &dir,
        "data/things.jsonl",
        "{\"name\":\"gate\",\"hp\":100}\n{\"name\":\"wall\",\"hp\":50}\n",
        "{\"name\":\"gate\",\"hp\":999}\n{\"name\":\"tower\",\"hp\":200}\n",
    );
    let lines: Vec<&str> = merged.lines().collect();
    assert_eq!(lines.len(), 3);
    // The first contributor's version of "gate" wins.
    assert!(lines.iter().any(|l| l.contains("\"gate\"") && l.contains("100")));
    assert!(!merged.contains("999"));
    assert!(merged.contains("\"tower\""));
}

#[test]
fn test_array_framed_records_keep_array_framing() {
    let dir = TempDir::new().unwrap();
    let merged = run_two(
        &dir,
        "data/spawns.json",
        "[{\"type\":\"crate\",\"pos\":[1.0,2.0,3.0]},{\"type\":\"crate\",\"pos\":[4.0,5.0,6.0]}]",
        "[{\"type\":\"crate\",\"pos\":[1.0000001,2.0,3.0]},{\"type\":\"barrel\",\"pos\":[7.0,8.0,9.0]}]",
    );
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&merged).unwrap();
    // Float noise on the first crate collapses to one record.
    assert_eq!(parsed.len(), 3);
}

#[test]
fn test_deep_merge_later_contributor_wins_scalars() {
    let dir = TempDir::new().unwrap();
    let merged = run_two(
        &dir,
        "settings/game.cfg",
        r#"{"graphics":{"shadows":"low","fov":90},"audio":{"volume":0.8}}"#,
        r#"{"graphics":{"shadows":"ultra"}}"#,
    );
    let v: serde_json::Value = serde_json::from_str(&merged).unwrap();
    assert_eq!(v["graphics"]["shadows"], "ultra");
    assert_eq!(v["graphics"]["fov"], 90);
    assert_eq!(v["audio"]["volume"], 0.8);
}

#[test]
fn test_deep_merge_bindings_dedup_by_control_action() {
    let dir = TempDir::new().unwrap();
    let merged = run_two(
        &dir,
        "settings/input.json",
        r#"{"bindings":[{"control":"W","action":"forward","sens":1.0}]}"#,
        r#"{"bindings":[{"control":"W","action":"forward","sens":2.5},{"control":"E","action":"use"}]}"#,
    );
    let v: serde_json::Value = serde_json::from_str(&merged).unwrap();
    let bindings = v["bindings"].as_array().unwrap();
    assert_eq!(bindings.len(), 2);
    // First occurrence of (W, forward) is kept, duplicate dropped.
    assert_eq!(bindings[0]["sens"], 1.0);
    assert_eq!(bindings[1]["control"], "E");
}

#[test]
fn test_script_merge_unions_blocks_and_variables() {
    let dir = TempDir::new().unwrap();
    let a = "local M = {}\n\
             \n\
             function M.update(dt)\n\
             \tM.tick = M.tick + 1\n\
             end\n\
             \n\
             return M\n";
    let b = "local M = {}\n\
             local extra = 5\n\
             \n\
             function M.update(dt)\n\
             \tM.tick = M.tick + 1\n\
             \tcallback(M.tick)\n\
             end\n\
             \n\
             function M.reset()\n\
             \tM.tick = 0\n\
             end\n\
             \n\
             return M\n";
    let merged = run_two(&dir, "scripts/counter.lua", a, b);

    // Both contributors' variables appear once each.
    assert_eq!(merged.matches("local M = {}").count(), 1);
    assert!(merged.contains("local extra = 5"));
    // The callback-registering variant of M.update wins the scoring.
    assert!(merged.contains("callback(M.tick)"));
    // The block only the second contributor has passes through.
    assert!(merged.contains("function M.reset()"));
    assert!(merged.trim_end().ends_with("return M"));
}

#[test]
fn test_script_merge_splices_complementary_markers() {
    let dir = TempDir::new().unwrap();
    let a = "local M = {}\n\
             \n\
             function M.init()\n\
             \tcallback(M.on_tick)\n\
             end\n\
             \n\
             return M\n";
    let b = "local M = {}\n\
             \n\
             function M.init()\n\
             \taddEventHandler(\"spawn\", M.on_spawn)\n\
             end\n\
             \n\
             return M\n";
    let merged = run_two(&dir, "scripts/hooks.lua", a, b);
    // Neither registration may be lost.
    assert!(merged.contains("callback(M.on_tick)"));
    assert!(merged.contains("addEventHandler(\"spawn\", M.on_spawn)"));
}

#[test]
fn test_merged_records_stable_under_reresolve() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let provider = VecProvider {
        packages: vec![
            dir_package(
                dir.path(),
                "first",
                &[("d.jsonl", "{\"name\":\"a\",\"v\":1}\n{\"name\":\"b\",\"v\":2}\n")],
            ),
            dir_package(dir.path(), "second", &[("d.jsonl", "{\"name\":\"c\",\"v\":3}\n")]),
        ],
    };
    engine.resolve(&provider, true).unwrap();
    let first = fs::read(overlay_file(&dir, "d.jsonl")).unwrap();

    // Force a re-merge through a fresh engine with no resolution index.
    fs::remove_dir_all(dir.path().join("cache")).unwrap();
    let engine = test_engine(&dir);
    engine.resolve(&provider, true).unwrap();
    let second = fs::read(overlay_file(&dir, "d.jsonl")).unwrap();
    assert_eq!(first, second);
}
