//! Integration tests for the encrypted, anonymized pattern-memory store
//! (C3), exercised against a real on-disk SQLite database rather than
//! through the in-module unit tests' shared-process assumptions.

mod common;

use cortexdx::pattern_memory::{NewPattern, PatternStore, QueryParams, SortBy};
use serial_test::serial;

fn save(store: &PatternStore, id: &str, problem_type: &str, success: u32, failure: u32, solution: serde_json::Value) {
    store
        .save_pattern(NewPattern {
            id: id.to_string(),
            problem_type: problem_type.to_string(),
            problem_signature: format!("signature for {id}"),
            solution,
            success_count: success,
            failure_count: failure,
            mean_resolution_ms: 1000.0,
        })
        .unwrap();
}

/// S8: three patterns with confidences 0.95, 0.667, 0.4 (derived from
/// success/failure counts via `base_confidence`); querying with
/// `sortBy=confidence, limit=2, minConfidence=0.5` returns exactly the two
/// highest, in descending order, excluding the one below threshold.
#[test]
#[serial]
fn retrieval_ranks_by_confidence_and_honors_threshold_and_limit() {
    let (store, _dir) = common::temp_pattern_store();

    save(&store, "high", "timeout", 19, 0, serde_json::json!({"fix": "raise timeout"}));
    save(&store, "mid", "timeout", 2, 0, serde_json::json!({"fix": "retry once"}));
    save(&store, "low", "timeout", 2, 2, serde_json::json!({"fix": "ignore"}));

    let high = store.get_pattern("high").unwrap().unwrap();
    let mid = store.get_pattern("mid").unwrap().unwrap();
    let low = store.get_pattern("low").unwrap().unwrap();
    assert!((high.confidence - 0.95).abs() < 1e-9);
    assert!((mid.confidence - (2.0 / 3.0)).abs() < 1e-9);
    assert!((low.confidence - 0.4).abs() < 1e-9);

    let results = store
        .query_patterns(QueryParams {
            min_confidence: 0.5,
            sort_by: SortBy::Confidence,
            limit: 2,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "high");
    assert_eq!(results[1].id, "mid");
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}

/// Every persisted pattern's confidence stays within [0,1], and a
/// save/get round trip reproduces the original solution payload exactly
/// (anonymization aside).
#[test]
#[serial]
fn confidence_bounds_and_round_trip() {
    let (store, _dir) = common::temp_pattern_store();
    save(&store, "p1", "auth", 5, 1, serde_json::json!({"note": "rotate credentials"}));

    let pattern = store.get_pattern("p1").unwrap().unwrap();
    assert!(pattern.confidence >= 0.0 && pattern.confidence <= 1.0);
    assert_eq!(pattern.solution["note"], "rotate credentials");
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}

/// Anonymization + encryption-at-rest: a solution payload containing an
/// email, a bearer token, an API key, and an IPv4 literal must not appear in
/// plaintext anywhere in the on-disk database file, and the decrypted
/// solution read back through the store must carry the redaction markers
/// instead.
#[test]
#[serial]
fn secrets_never_touch_disk_in_plaintext() {
    let (store, dir) = common::temp_pattern_store();
    let db_path = dir.path().join("patterns.db");

    let secret_email = "alice@example.com";
    let secret_token = "Bearer sk-proj-abcdef1234567890abcdef1234567890";
    let secret_ip = "10.20.30.40";

    save(
        &store,
        "secret-bearing",
        "leak",
        1,
        0,
        serde_json::json!({
            "contact": secret_email,
            "auth_header": secret_token,
            "host": secret_ip,
        }),
    );

    let on_disk = std::fs::read(&db_path).unwrap();
    let haystack = String::from_utf8_lossy(&on_disk);
    assert!(!haystack.contains(secret_email), "email leaked to disk");
    assert!(!haystack.contains("abcdef1234567890abcdef1234567890"), "bearer token leaked to disk");
    assert!(!haystack.contains(secret_ip), "IPv4 literal leaked to disk");

    let pattern = store.get_pattern("secret-bearing").unwrap().unwrap();
    let solution_text = pattern.solution.to_string();
    assert!(!solution_text.contains(secret_email));
    assert!(!solution_text.contains(secret_ip));
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}

/// `pruneOldPatterns` removes only records whose last-used timestamp
/// precedes the cutoff, returning the deletion count.
#[test]
#[serial]
fn prune_old_patterns_removes_only_stale_records() {
    let (store, _dir) = common::temp_pattern_store();
    save(&store, "fresh", "x", 1, 0, serde_json::json!({}));

    // A max_age of zero makes every record "old" relative to now.
    let removed = store.prune_old_patterns(chrono::Duration::zero()).unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_pattern("fresh").unwrap().is_none());
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}

/// A record that fails to decrypt (wrong key material in a later process)
/// is surfaced as a zero-confidence `legacy-`-prefixed placeholder rather
/// than silently discarded.
#[test]
#[serial]
fn undecryptable_record_becomes_legacy_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("patterns.db");

    std::env::set_var("CORTEXDX_PATTERN_KEY", common::temp_pattern_key());
    {
        let store = PatternStore::new_with_path(&db_path, false).unwrap();
        save(&store, "will-rot", "rot", 1, 0, serde_json::json!({"fix": "n/a"}));
    }

    // Reopen with a different key: the ciphertext no longer opens.
    std::env::set_var("CORTEXDX_PATTERN_KEY", common::temp_pattern_key());
    let store = PatternStore::new_with_path(&db_path, false).unwrap();
    let pattern = store.get_pattern("will-rot").unwrap().unwrap();
    assert_eq!(pattern.id, "legacy-will-rot");
    assert_eq!(pattern.confidence, 0.0);
    std::env::remove_var("CORTEXDX_PATTERN_KEY");
}
