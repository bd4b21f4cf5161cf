//! Configuration management for CortexDx
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides,
//! following the `Config::load` -> `apply_env_vars` -> `apply_cli_overrides`
//! -> `validate` pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CortexDxError, Result};

/// Main configuration structure for CortexDx.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pattern_memory: PatternMemoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// C1 transport timeouts, independent of the per-run endpoint (supplied on
/// the CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    20_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// C2 rate-limit defaults applied to every probe's outbound calls unless a
/// probe overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_min_interval_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RateLimitConfig {
    pub fn to_retry_config(&self) -> crate::ratelimit::RetryConfig {
        crate::ratelimit::RetryConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }
}

/// C3 pattern-memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMemoryConfig {
    /// Overrides the platform data directory's `patterns.db` path.
    #[serde(default)]
    pub db_path: Option<String>,
    /// Gate for the unencrypted retrieval-pattern store. Never on by
    /// default; refused outright in any environment where this flag is
    /// unset, which is the only environment check this crate performs.
    #[serde(default)]
    pub dev_plaintext: bool,
    /// Patterns unused for longer than this are eligible for pruning.
    #[serde(default = "default_max_pattern_age_days")]
    pub max_age_days: i64,
}

fn default_max_pattern_age_days() -> i64 {
    180
}

impl Default for PatternMemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            dev_plaintext: false,
            max_age_days: default_max_pattern_age_days(),
        }
    }
}

/// C4 probe-orchestrator defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// `None` lets the orchestrator pick `min(8, selected probe count)`.
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default = "default_evidence_cap")]
    pub evidence_cap: usize,
    /// Minimum severity that raises the run's exit code, independent of the
    /// severity-to-exit-code mapping itself.
    #[serde(default)]
    pub severity_gate: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_probe_timeout_ms() -> u64 {
    60_000
}

fn default_evidence_cap() -> usize {
    crate::orchestrator::types::DEFAULT_EVIDENCE_CAP
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            parallelism: None,
            evidence_cap: default_evidence_cap(),
            severity_gate: None,
            output_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn severity_gate(&self) -> Result<Option<crate::orchestrator::types::Severity>> {
        use crate::orchestrator::types::Severity;
        match self.severity_gate.as_deref() {
            None => Ok(None),
            Some("info") => Ok(Some(Severity::Info)),
            Some("minor") => Ok(Some(Severity::Minor)),
            Some("major") => Ok(Some(Severity::Major)),
            Some("blocker") => Ok(Some(Severity::Blocker)),
            Some(other) => Err(anyhow::anyhow!(CortexDxError::Config(format!(
                "invalid severity gate '{other}': must be one of info, minor, major, blocker"
            )))),
        }
    }
}

/// C5 conversational session manager defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_history_window() -> usize {
    crate::conversation::session::DEFAULT_HISTORY_WINDOW
}

fn default_idle_timeout_secs() -> u64 {
    crate::conversation::session::DEFAULT_IDLE_TIMEOUT.as_secs()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ConversationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// LLM adapter connection details, used by `cortexdx chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional per-capability model override, keyed by
    /// `SessionTypeHint::preferred_capability()` (e.g. `"code-oriented"`).
    #[serde(default)]
    pub model_by_capability: std::collections::HashMap<String, String>,
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "local-model".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_ms: default_llm_timeout_ms(),
            model_by_capability: std::collections::HashMap::new(),
        }
    }
}

impl LlmConfig {
    pub fn to_adapter_config(&self) -> crate::llm::http::HttpAdapterConfig {
        crate::llm::http::HttpAdapterConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            model_by_capability: self.model_by_capability.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pattern_memory: PatternMemoryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            conversation: ConversationConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides.
    /// Falls back to defaults if the file does not exist, consistent with a
    /// first-run experience that needs no config file at all.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CortexDxError::Config(format!("failed to read config file: {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CortexDxError::Config(format!("failed to parse config: {e}")).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(db_path) = std::env::var("CORTEXDX_PATTERN_DB") {
            self.pattern_memory.db_path = Some(db_path);
        }

        if let Ok(timeout) = std::env::var("ACADEMIC_PROVIDER_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(v) => self.transport.request_timeout_ms = v,
                Err(_) => tracing::warn!("invalid ACADEMIC_PROVIDER_TIMEOUT_MS: {}", timeout),
            }
        }

        if let Ok(concurrency) = std::env::var("ACADEMIC_PROVIDER_MAX_CONCURRENCY") {
            match concurrency.parse::<usize>() {
                Ok(v) => self.orchestrator.parallelism = Some(v.max(1)),
                Err(_) => tracing::warn!("invalid ACADEMIC_PROVIDER_MAX_CONCURRENCY: {}", concurrency),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("verbose mode enabled");
        }
    }

    /// Validate the configuration, rejecting out-of-range values before any
    /// component is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.backoff_factor < 1.0 {
            return Err(CortexDxError::Config("rate_limit.backoff_factor must be >= 1".to_string()).into());
        }

        if let Some(path) = &self.pattern_memory.db_path {
            if path.is_empty() {
                return Err(CortexDxError::Config("pattern_memory.db_path must not be empty".to_string()).into());
            }
        }

        if self.pattern_memory.max_age_days < 0 {
            return Err(CortexDxError::Config("pattern_memory.max_age_days must be non-negative".to_string()).into());
        }

        if self.orchestrator.evidence_cap == 0 {
            return Err(CortexDxError::Config("orchestrator.evidence_cap must be greater than 0".to_string()).into());
        }

        if let Some(parallelism) = self.orchestrator.parallelism {
            if parallelism == 0 {
                return Err(CortexDxError::Config("orchestrator.parallelism must be greater than 0".to_string()).into());
            }
        }

        self.orchestrator.severity_gate()?;

        if self.conversation.history_window == 0 {
            return Err(CortexDxError::Config("conversation.history_window must be greater than 0".to_string()).into());
        }

        if self.llm.base_url.is_empty() {
            return Err(CortexDxError::Config("llm.base_url must not be empty".to_string()).into());
        }

        Ok(())
    }
}
