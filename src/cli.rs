//! Command-line interface definition for CortexDx
//!
//! This module defines the CLI structure using clap's derive API, providing
//! commands for diagnosing an MCP endpoint, entering a conversational
//! session, and maintaining the pattern-memory store.

use clap::{Parser, Subcommand};

/// CortexDx - diagnostic and self-improvement engine for MCP servers.
#[derive(Parser, Debug, Clone)]
#[command(name = "cortexdx")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CORTEXDX_CONFIG", default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for CortexDx.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a diagnostic sweep against an MCP endpoint
    Diagnose {
        /// MCP endpoint under test (an HTTP(S) URL, or an executable path for
        /// a stdio-transport server)
        endpoint: String,

        /// Comma-separated probe ids to run; omit to run every registered probe
        #[arg(long)]
        suites: Option<String>,

        /// Minimum severity that raises the exit code (info, minor, major, blocker)
        #[arg(long)]
        severity: Option<String>,

        /// Directory to write research.json/research.md into
        #[arg(long)]
        out: Option<String>,

        /// Run probes in the background and print a run id immediately
        #[arg(long)]
        r#async: bool,

        /// Per-probe wall-clock budget in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Force deterministic mode (zero-temperature LLM calls, stable ordering)
        #[arg(long)]
        deterministic: bool,
    },

    /// Enter a conversational session against an MCP endpoint's diagnostics
    Chat {
        /// MCP endpoint to diagnose conversationally
        endpoint: String,

        /// Expertise level: beginner, intermediate, expert
        #[arg(long, default_value = "intermediate")]
        expertise: String,

        /// Deterministic seed for reproducible LLM responses
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Maintain the pattern-memory store
    Patterns {
        #[command(subcommand)]
        command: PatternsCommand,
    },
}

/// Pattern-memory maintenance subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum PatternsCommand {
    /// List stored patterns, optionally filtered and sorted
    List {
        /// Filter by problem type
        #[arg(long)]
        problem_type: Option<String>,

        /// Minimum confidence to include
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        /// Maximum number of patterns to return
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete patterns unused longer than the configured max age
    Prune {
        /// Override the configured max age, in days
        #[arg(long)]
        max_age_days: Option<i64>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            command: Commands::Patterns {
                command: PatternsCommand::List {
                    problem_type: None,
                    min_confidence: 0.0,
                    limit: 10,
                },
            },
        }
    }
}
