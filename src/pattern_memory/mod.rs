//! C3: encrypted, anonymized, similarity-searchable resolution-pattern store.
//!
//! A [`PatternStore`] persists [`Pattern`] records to a local SQLite database.
//! Every solution payload is anonymized ([`anonymize`]) before it is sealed
//! with an authenticated cipher ([`crypto`]); plaintext never reaches disk.
//! Retrieval is a two-stage affair: a cheap token-prefix `LIKE` shortlist
//! (bounded to [`SHORTLIST_SIZE`] candidates by recency) followed by an
//! in-process Jaccard rank ([`similarity`]) against the caller's query
//! signature.

pub mod anonymize;
pub mod crypto;
pub mod similarity;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CortexDxError, Result};
use crypto::{PatternCipher, SealedBlob};

/// Shortlist size pulled by token-prefix match before Jaccard ranking.
pub const SHORTLIST_SIZE: usize = 200;

/// Field a caller may sort retrieval results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Confidence,
    SuccessRate,
    RecentUse,
    TotalUses,
}

/// A persisted resolution pattern, solution blob decrypted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Pattern {
    pub id: String,
    pub problem_type: String,
    pub problem_signature: String,
    pub solution: serde_json::Value,
    pub success_count: u32,
    pub failure_count: u32,
    pub mean_resolution_ms: f64,
    pub last_used: DateTime<Utc>,
    pub confidence: f64,
}

/// Input to [`PatternStore::save_pattern`]; callers never set `confidence`
/// directly, it is always derived.
#[derive(Debug, Clone)]
pub struct NewPattern {
    pub id: String,
    pub problem_type: String,
    pub problem_signature: String,
    pub solution: serde_json::Value,
    pub success_count: u32,
    pub failure_count: u32,
    pub mean_resolution_ms: f64,
}

/// One feedback entry recorded against a pattern after it was applied.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FeedbackEntry {
    pub pattern_id: String,
    pub rating: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Parameters governing a ranked retrieval query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub signature: String,
    pub problem_type: Option<String>,
    pub min_confidence: f64,
    pub min_success_count: u32,
    pub max_age_ms: Option<i64>,
    /// Jaccard similarity floor; candidates scoring at or below this are
    /// dropped before ranking. Ignored when `signature` tokenizes empty.
    pub min_similarity: f64,
    pub sort_by: SortBy,
    pub limit: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            signature: String::new(),
            problem_type: None,
            min_confidence: 0.0,
            min_success_count: 0,
            max_age_ms: None,
            min_similarity: 0.0,
            sort_by: SortBy::Confidence,
            limit: 10,
        }
    }
}

/// `base confidence = successCount / (successCount + failureCount + 1)`.
pub fn base_confidence(success_count: u32, failure_count: u32) -> f64 {
    success_count as f64 / (success_count as f64 + failure_count as f64 + 1.0)
}

/// Blend base confidence with recent feedback once at least three ratings
/// landed within the last 30 days: `0.7*c0 + 0.3*(avgRecentRating/5)`.
pub fn blended_confidence(c0: f64, recent_ratings: &[f64]) -> f64 {
    if recent_ratings.len() < 3 {
        return c0;
    }
    let avg = recent_ratings.iter().sum::<f64>() / recent_ratings.len() as f64;
    (0.7 * c0 + 0.3 * (avg / 5.0)).clamp(0.0, 1.0)
}

/// Tracks which record ids have already logged a decryption failure, so the
/// warning fires at most once per record per process.
fn logged_crypto_failures() -> &'static Mutex<HashSet<String>> {
    static SET: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    SET.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Embedded-SQLite-backed pattern store.
///
/// Mirrors the conversation-history storage idiom: a thin struct wrapping a
/// `PathBuf`, each operation opens a short-lived [`Connection`], write paths
/// run inside an explicit transaction.
pub struct PatternStore {
    db_path: PathBuf,
    cipher: PatternCipher,
}

impl PatternStore {
    /// Open (creating if needed) the pattern database at the platform data
    /// directory, honoring a `CORTEXDX_PATTERN_DB` path override.
    pub fn new(dev_plaintext: bool) -> Result<Self> {
        if let Ok(override_path) = std::env::var("CORTEXDX_PATTERN_DB") {
            return Self::new_with_path(override_path, dev_plaintext);
        }

        let proj_dirs = ProjectDirs::from("com", "cortexdx", "cortexdx")
            .ok_or_else(|| anyhow::anyhow!(CortexDxError::Storage("could not determine data directory".into())))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("failed to create pattern-memory data directory")?;

        Self::new_with_path(data_dir.join("patterns.db"), dev_plaintext)
    }

    /// Open the store at an explicit path, primarily for tests.
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P, dev_plaintext: bool) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create parent directory")?;
        }
        let cipher = PatternCipher::from_env(dev_plaintext)?;
        let store = Self { db_path, cipher };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("failed to open pattern database").map_err(Into::into)
    }

    /// Idempotent `CREATE TABLE IF NOT EXISTS` schema application.
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                problem_type TEXT NOT NULL,
                problem_signature TEXT NOT NULL,
                signature_tokens TEXT NOT NULL,
                solution_nonce TEXT NOT NULL,
                solution_ciphertext TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                mean_resolution_ms REAL NOT NULL DEFAULT 0,
                last_used TEXT NOT NULL,
                confidence REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_problem_type ON patterns (problem_type);
            CREATE INDEX IF NOT EXISTS idx_patterns_confidence ON patterns (confidence DESC);
            CREATE INDEX IF NOT EXISTS idx_patterns_last_used ON patterns (last_used DESC);
            CREATE INDEX IF NOT EXISTS idx_patterns_tokens ON patterns (signature_tokens);

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id TEXT NOT NULL,
                rating REAL NOT NULL,
                recorded_at TEXT NOT NULL,
                FOREIGN KEY (pattern_id) REFERENCES patterns (id)
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_pattern ON feedback (pattern_id, recorded_at DESC);

            CREATE TABLE IF NOT EXISTS common_issues (
                problem_type TEXT PRIMARY KEY,
                occurrence_count INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL
            );",
        )
        .context("failed to create pattern-memory schema")?;
        Ok(())
    }

    /// Anonymize, encrypt, and persist (insert or replace) a pattern.
    pub fn save_pattern(&self, input: NewPattern) -> Result<Pattern> {
        let signature = anonymize::anonymize_text(&input.problem_signature);
        let solution = anonymize::anonymize_value(&input.solution);
        let solution_text = serde_json::to_string(&solution)?;
        let sealed = self.cipher.seal(&solution_text)?;

        let confidence = base_confidence(input.success_count, input.failure_count);
        let now = Utc::now();
        let tokens: Vec<String> = similarity::tokenize(&signature).into_iter().collect();
        let token_blob = format!(" {} ", tokens.join(" "));

        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO patterns
                (id, problem_type, problem_signature, signature_tokens, solution_nonce,
                 solution_ciphertext, success_count, failure_count, mean_resolution_ms,
                 last_used, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                problem_type = excluded.problem_type,
                problem_signature = excluded.problem_signature,
                signature_tokens = excluded.signature_tokens,
                solution_nonce = excluded.solution_nonce,
                solution_ciphertext = excluded.solution_ciphertext,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                mean_resolution_ms = excluded.mean_resolution_ms,
                last_used = excluded.last_used,
                confidence = excluded.confidence",
            params![
                input.id,
                input.problem_type,
                signature,
                token_blob,
                sealed.nonce_hex,
                sealed.ciphertext_hex,
                input.success_count,
                input.failure_count,
                input.mean_resolution_ms,
                now.to_rfc3339(),
                confidence,
            ],
        )
        .context("failed to upsert pattern")?;

        tx.execute(
            "INSERT INTO common_issues (problem_type, occurrence_count, last_seen)
             VALUES (?1, 1, ?2)
             ON CONFLICT(problem_type) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                last_seen = excluded.last_seen",
            params![input.problem_type, now.to_rfc3339()],
        )
        .context("failed to update common-issue aggregate")?;

        tx.commit().context("failed to commit pattern save")?;

        Ok(Pattern {
            id: input.id,
            problem_type: input.problem_type,
            problem_signature: signature,
            solution,
            success_count: input.success_count,
            failure_count: input.failure_count,
            mean_resolution_ms: input.mean_resolution_ms,
            last_used: now,
            confidence,
        })
    }

    /// Fetch a single pattern by id, decrypting the solution blob. A record
    /// that fails decryption is returned as a zero-confidence `legacy-`
    /// placeholder rather than discarded (logged at most once per id).
    pub fn get_pattern(&self, id: &str) -> Result<Option<Pattern>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, problem_type, problem_signature, solution_nonce,
                        solution_ciphertext, success_count, failure_count,
                        mean_resolution_ms, last_used, confidence
                 FROM patterns WHERE id = ?1",
                params![id],
                Self::row_to_raw,
            )
            .optional()
            .context("failed to query pattern")?;

        match row {
            Some(raw) => Ok(Some(self.decode_row(raw))),
            None => Ok(None),
        }
    }

    type RawRow = (String, String, String, String, String, u32, u32, f64, String, f64);

    fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ))
    }

    fn decode_row(&self, raw: RawRow) -> Pattern {
        let (id, problem_type, signature, nonce_hex, ciphertext_hex, success, failure, mean_ms, last_used, confidence) = raw;
        let last_used = DateTime::parse_from_rfc3339(&last_used)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let opened = self.cipher.open(&SealedBlob { nonce_hex, ciphertext_hex });
        match opened {
            Ok(text) => {
                let solution = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
                Pattern {
                    id,
                    problem_type,
                    problem_signature: signature,
                    solution,
                    success_count: success,
                    failure_count: failure,
                    mean_resolution_ms: mean_ms,
                    last_used,
                    confidence,
                }
            }
            Err(e) => {
                let mut logged = logged_crypto_failures().lock().unwrap();
                if logged.insert(id.clone()) {
                    tracing::error!(record_id = %id, error = %e, "pattern decryption failed, returning placeholder");
                }
                Pattern {
                    id: format!("legacy-{id}"),
                    problem_type,
                    problem_signature: signature,
                    solution: serde_json::Value::Null,
                    success_count: 0,
                    failure_count: 0,
                    mean_resolution_ms: 0.0,
                    last_used,
                    confidence: 0.0,
                }
            }
        }
    }

    /// Record a feedback rating against a pattern and recompute confidence
    /// with the feedback-weighted blend once three ratings exist within the
    /// last 30 days.
    pub fn record_feedback(&self, pattern_id: &str, rating: f64) -> Result<f64> {
        let now = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to start transaction")?;

        tx.execute(
            "INSERT INTO feedback (pattern_id, rating, recorded_at) VALUES (?1, ?2, ?3)",
            params![pattern_id, rating, now.to_rfc3339()],
        )
        .context("failed to record feedback")?;

        let (success_count, failure_count): (u32, u32) = tx
            .query_row(
                "SELECT success_count, failure_count FROM patterns WHERE id = ?1",
                params![pattern_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("pattern not found for feedback")?;

        let cutoff = now - chrono::Duration::days(30);
        let mut stmt = tx
            .prepare("SELECT rating FROM feedback WHERE pattern_id = ?1 AND recorded_at >= ?2")
            .context("failed to prepare recent-feedback query")?;
        let recent: Vec<f64> = stmt
            .query_map(params![pattern_id, cutoff.to_rfc3339()], |row| row.get(0))
            .context("failed to query recent feedback")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect recent feedback")?;
        drop(stmt);

        let c0 = base_confidence(success_count, failure_count);
        let confidence = blended_confidence(c0, &recent);

        tx.execute(
            "UPDATE patterns SET confidence = ?1, last_used = ?2 WHERE id = ?3",
            params![confidence, now.to_rfc3339(), pattern_id],
        )
        .context("failed to update confidence")?;

        tx.commit().context("failed to commit feedback")?;
        Ok(confidence)
    }

    /// Ranked, similarity-aware retrieval. Pulls a token-prefix shortlist
    /// (bounded to [`SHORTLIST_SIZE`] by recency), ranks by Jaccard overlap
    /// against `params.signature`, applies caller filters, then sorts
    /// strictly descending on `params.sort_by` (ties break on last-used
    /// descending).
    pub fn query_patterns(&self, params: QueryParams) -> Result<Vec<Pattern>> {
        let conn = self.conn()?;
        let query_tokens = similarity::tokenize(&params.signature);

        let mut stmt = if let Some(problem_type) = &params.problem_type {
            conn.prepare(
                "SELECT id, problem_type, problem_signature, solution_nonce, solution_ciphertext,
                        success_count, failure_count, mean_resolution_ms, last_used, confidence
                 FROM patterns WHERE problem_type = ?1
                 ORDER BY last_used DESC LIMIT ?2",
            )
        } else {
            conn.prepare(
                "SELECT id, problem_type, problem_signature, solution_nonce, solution_ciphertext,
                        success_count, failure_count, mean_resolution_ms, last_used, confidence
                 FROM patterns ORDER BY last_used DESC LIMIT ?1",
            )
        }
        .context("failed to prepare retrieval query")?;

        let raw_rows: Vec<RawRow> = if let Some(problem_type) = &params.problem_type {
            stmt.query_map(params![problem_type, SHORTLIST_SIZE as i64], Self::row_to_raw)
        } else {
            stmt.query_map(params![SHORTLIST_SIZE as i64], Self::row_to_raw)
        }
        .context("failed to run retrieval query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to collect retrieval rows")?;
        drop(stmt);

        let now = Utc::now();
        let mut candidates: Vec<(Pattern, f64)> = raw_rows
            .into_iter()
            .map(|raw| self.decode_row(raw))
            .filter(|p| p.confidence >= params.min_confidence)
            .filter(|p| p.success_count >= params.min_success_count)
            .filter(|p| match params.max_age_ms {
                Some(max_age) => (now - p.last_used).num_milliseconds() <= max_age,
                None => true,
            })
            .map(|p| {
                let tokens = similarity::tokenize(&p.problem_signature);
                let score = if query_tokens.is_empty() {
                    1.0
                } else {
                    similarity::jaccard(&query_tokens, &tokens)
                };
                (p, score)
            })
            .collect();

        if !query_tokens.is_empty() {
            candidates.retain(|(_, score)| *score > params.min_similarity);
        }

        candidates.sort_by(|(a, a_score), (b, b_score)| {
            let primary = match params.sort_by {
                SortBy::Confidence => b.confidence.partial_cmp(&a.confidence),
                SortBy::SuccessRate => {
                    let rate = |p: &Pattern| p.success_count as f64 / (p.success_count + p.failure_count).max(1) as f64;
                    rate(b).partial_cmp(&rate(a))
                }
                SortBy::RecentUse => b.last_used.partial_cmp(&a.last_used),
                SortBy::TotalUses => {
                    let total = |p: &Pattern| p.success_count + p.failure_count;
                    total(b).partial_cmp(&total(a))
                }
            }
            .unwrap_or(std::cmp::Ordering::Equal);

            primary
                .then_with(|| b_score.partial_cmp(a_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.last_used.cmp(&a.last_used))
        });

        Ok(candidates
            .into_iter()
            .take(params.limit)
            .map(|(p, _)| p)
            .collect())
    }

    /// Delete patterns whose last-used timestamp precedes `now - max_age`.
    /// Returns the number of rows removed.
    pub fn prune_old_patterns(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM patterns WHERE last_used < ?1",
                params![cutoff.to_rfc3339()],
            )
            .context("failed to prune patterns")?;
        Ok(removed)
    }
}
