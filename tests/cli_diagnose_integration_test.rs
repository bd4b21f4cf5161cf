//! CLI-level end-to-end test: drives the compiled `cortexdx` binary's
//! `diagnose` subcommand against the `mcp_test_server` stdio fixture and
//! checks exit code and report-artifact behavior.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn diagnose_against_stdio_fixture_exits_zero_and_prints_report() {
    let exe = common::mcp_test_server_exe();
    let key = common::temp_pattern_key();

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("cortexdx").expect("cortexdx binary not built");
    cmd.arg("diagnose")
        .arg(exe)
        .env("CORTEXDX_PATTERN_KEY", &key)
        .env("CORTEXDX_PATTERN_DB", dir.path().join("patterns.db"))
        .env_remove("CORTEXDX_CONFIG");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("mcp-test-server").or(predicate::str::contains("Diagnostic")).or(predicate::str::contains("#")));
}

#[test]
fn diagnose_writes_report_artifacts_when_out_is_given() {
    let exe = common::mcp_test_server_exe();
    let key = common::temp_pattern_key();
    let db_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("cortexdx").expect("cortexdx binary not built");
    cmd.arg("diagnose")
        .arg(exe)
        .arg("--out")
        .arg(out_dir.path())
        .env("CORTEXDX_PATTERN_KEY", &key)
        .env("CORTEXDX_PATTERN_DB", db_dir.path().join("patterns.db"))
        .env_remove("CORTEXDX_CONFIG");

    cmd.assert().success();

    let found_research_json = walk_for(out_dir.path(), "research.json");
    let found_research_md = walk_for(out_dir.path(), "research.md");
    assert!(found_research_json, "research.json not written under --out dir");
    assert!(found_research_md, "research.md not written under --out dir");
}

fn walk_for(root: &std::path::Path, filename: &str) -> bool {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
                return true;
            }
        }
    }
    false
}
