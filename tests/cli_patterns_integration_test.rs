//! CLI-level test of `cortexdx patterns list`/`patterns prune` against a
//! temporary pattern-memory database selected via `CORTEXDX_PATTERN_DB`.

mod common;

use assert_cmd::Command;
use cortexdx::pattern_memory::{NewPattern, PatternStore};
use predicates::prelude::*;

fn seed_store(db_path: &std::path::Path, key: &str) {
    std::env::set_var("CORTEXDX_PATTERN_KEY", key);
    let store = PatternStore::new_with_path(db_path, false).unwrap();
    store
        .save_pattern(NewPattern {
            id: "seeded".to_string(),
            problem_type: "timeout".to_string(),
            problem_signature: "connection timed out after 30s".to_string(),
            solution: serde_json::json!({"fix": "raise the client timeout"}),
            success_count: 9,
            failure_count: 0,
            mean_resolution_ms: 500.0,
        })
        .unwrap();
}

#[test]
fn patterns_list_prints_seeded_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("patterns.db");
    let key = common::temp_pattern_key();
    seed_store(&db_path, &key);

    let mut cmd = Command::cargo_bin("cortexdx").expect("cortexdx binary not built");
    cmd.arg("patterns")
        .arg("list")
        .env("CORTEXDX_PATTERN_KEY", &key)
        .env("CORTEXDX_PATTERN_DB", &db_path)
        .env_remove("CORTEXDX_CONFIG");

    cmd.assert().success().stdout(predicate::str::contains("seeded")).stdout(predicate::str::contains("timeout"));
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}

#[test]
fn patterns_prune_removes_stale_entries() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("patterns.db");
    let key = common::temp_pattern_key();
    seed_store(&db_path, &key);

    let mut cmd = Command::cargo_bin("cortexdx").expect("cortexdx binary not built");
    cmd.arg("patterns")
        .arg("prune")
        .arg("--max-age-days")
        .arg("0")
        .env("CORTEXDX_PATTERN_KEY", &key)
        .env("CORTEXDX_PATTERN_DB", &db_path)
        .env_remove("CORTEXDX_CONFIG");

    cmd.assert().success().stdout(predicate::str::contains("pruned"));
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}
