use std::fs;
use std::path::PathBuf;

use cortexdx::pattern_memory::PatternStore;
use tempfile::TempDir;

/// A throwaway 64-hex-char pattern-memory key, distinct per call so
/// concurrent tests never share ciphertext.
#[allow(dead_code)]
pub fn temp_pattern_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Open a fresh [`PatternStore`] backed by a tempdir database, setting its
/// own encryption key in the process environment first.
///
/// Returns `(store, tempdir)` — keep the `TempDir` alive for as long as the
/// store is in use.
#[allow(dead_code)]
pub fn temp_pattern_store() -> (PatternStore, TempDir) {
    let dir = TempDir::new().expect("failed to create tempdir");
    let db_path = dir.path().join("patterns.db");
    std::env::set_var("CORTEXDX_PATTERN_KEY", temp_pattern_key());
    let store = PatternStore::new_with_path(db_path, false).expect("failed to open pattern store");
    (store, dir)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Path to the `mcp_test_server` binary built alongside this crate's tests.
#[allow(dead_code)]
pub fn mcp_test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }
    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest).join("target").join("debug").join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }
    PathBuf::from("mcp_test_server")
}
