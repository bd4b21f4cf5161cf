//! Error types for CortexDx
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for CortexDx operations
///
/// This enum encompasses all possible errors that can occur during
/// transport handshakes, rate-limited calls, pattern-memory persistence,
/// probe execution, and conversational session management.
#[derive(Error, Debug)]
pub enum CortexDxError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport handshake failed; fatal for the whole diagnostic run
    #[error("Transport handshake failed: {0}")]
    TransportFatal(String),

    /// A single JSON-RPC call failed; surfaced to the calling probe only
    #[error("Transport call failed: {0}")]
    TransportTransient(String),

    /// MCP protocol version negotiation failure
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    ProtocolVersion {
        /// List of accepted versions
        expected: Vec<String>,
        /// Version the server returned
        got: String,
    },

    /// A JSON-RPC error response was returned by the peer
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// C2 exhausted its retry budget; wraps the last underlying failure
    #[error("Rate limit retries exhausted for key {key}: {last_error}")]
    RateLimitExhausted {
        /// The rate-limit key
        key: String,
        /// The last underlying failure, unchanged
        last_error: String,
    },

    /// Pattern decryption failed; caller receives a placeholder pattern instead
    #[error("Pattern decryption failed for record {0}")]
    Crypto(String),

    /// Malformed input rejected at validation time
    #[error("Validation error: {0}")]
    Validation(String),

    /// Auth/access failure surfaced as a structured response
    #[error("Auth error: {0}")]
    Auth(String),

    /// Pattern-memory storage errors (database operations)
    #[error("Pattern memory storage error: {0}")]
    Storage(String),

    /// Named probe not found in the registry
    #[error("Probe not found: {0}")]
    ProbeNotFound(String),

    /// Conversational session not found (expired or never existed)
    #[error("Conversational session not found: {0}")]
    SessionNotFound(String),

    /// LLM adapter call failed
    #[error("LLM adapter error: {0}")]
    LlmAdapter(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite errors from the pattern-memory store
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for CortexDx operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation at call sites.
/// Trait boundaries that other crates implement against return the concrete
/// [`CortexDxError`] instead.
pub type Result<T> = anyhow::Result<T>;
