//! CortexDx - diagnostic and self-improvement engine for Model Context
//! Protocol servers.
//!
//! This library provides the core functionality for diagnosing MCP servers:
//! a handshake-once transport session, a per-key rate limiter, an encrypted
//! resolution-pattern memory, a bounded-parallelism probe orchestrator, and a
//! conversational session manager that narrates findings and drives fixes.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `transport`: C1, the MCP transport session (JSON-RPC over HTTP/SSE or stdio)
//! - `ratelimit`: C2, per-key FIFO rate limiting with exponential backoff
//! - `pattern_memory`: C3, the encrypted, anonymized resolution-pattern store
//! - `orchestrator`: C4, the probe registry, run driver, and report writer
//! - `conversation`: C5, the conversational session manager
//! - `llm`: the LLM adapter contract and an HTTP-backed implementation
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use cortexdx::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     // Orchestrator/session usage would go here
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pattern_memory;
pub mod ratelimit;
pub mod transport;

pub use config::Config;
pub use error::{CortexDxError, Result};
pub use orchestrator::{Orchestrator, ProbeRegistry, Report, RunConfig, RunOutcome};
pub use pattern_memory::PatternStore;
pub use ratelimit::RateLimiter;

#[cfg(test)]
pub mod test_utils;
