//! C4 data model: findings, evidence, probe contracts, and the diagnostic
//! context handed to every probe worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pattern_memory::PatternStore;
use crate::ratelimit::RateLimiter;
use crate::transport::session::{JsonRpcOpts, SseProbeOpts, SseProbeResult, Transcript};
use crate::transport::TransportSession;

/// Default cap applied to any single evidence excerpt before it is persisted
/// in a report.
pub const DEFAULT_EVIDENCE_CAP: usize = 2000;

/// Default per-probe wall-clock budget.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Diagnostic severity, ordered `Info < Minor < Major < Blocker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Blocker,
}

impl Severity {
    /// Maps the highest severity observed in a run to its exit code, absent
    /// any severity-gate override: `info|minor -> 0`, `major -> 1`, `blocker -> 2`.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Info | Severity::Minor => 0,
            Severity::Major => 1,
            Severity::Blocker => 2,
        }
    }
}

/// A tagged reference backing a finding: a URL, a log excerpt, a file range,
/// or a trace span. Excerpts are truncated to [`DEFAULT_EVIDENCE_CAP`] (or a
/// caller-supplied cap) before a finding is reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidencePointer {
    Url { url: String, reference: String },
    Log { excerpt: String },
    File { path: String, line_start: u32, line_end: u32 },
    Span { trace_id: String },
}

impl EvidencePointer {
    /// Truncate the textual payload in place to `cap` bytes, appending an
    /// ellipsis marker when truncation actually occurs.
    pub fn truncate(&mut self, cap: usize) {
        let truncate_str = |s: &mut String| {
            if s.len() > cap {
                s.truncate(cap);
                s.push_str("…");
            }
        };
        match self {
            EvidencePointer::Url { reference, .. } => truncate_str(reference),
            EvidencePointer::Log { excerpt } => truncate_str(excerpt),
            EvidencePointer::File { path, .. } => truncate_str(path),
            EvidencePointer::Span { trace_id } => truncate_str(trace_id),
        }
    }
}

/// Risk level attached to an auto-fix suggestion by the conversational
/// manager (C5). Probes never set this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// An atomic diagnostic observation produced by a probe.
///
/// Findings are value objects: a probe produces them, and only the
/// orchestrator's enrichment pass or the conversational manager's
/// enrichment step may add fields afterward (append-only, never mutated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable dotted-namespace identifier, e.g. `transport.handshake`.
    pub id: String,
    /// Area tag grouping related findings, e.g. `transport`, `auth`, `perf`.
    pub area: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<EvidencePointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    // Enrichment fields written only by the conversational session manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_to_modify: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_changes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<bool>,
}

impl Finding {
    /// Construct a minimal finding; evidence and recommendation start empty.
    pub fn new(id: impl Into<String>, area: impl Into<String>, severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            area: area.into(),
            severity,
            title: title.into(),
            description: description.into(),
            evidence: Vec::new(),
            recommendation: None,
            tags: None,
            confidence: None,
            llm_analysis: None,
            root_cause: None,
            files_to_modify: None,
            code_changes: None,
            validation_steps: None,
            risk_level: None,
            template_id: None,
            auto_fix: None,
        }
    }

    /// The dedup key used by the normalization pass: `(id, title)`.
    pub fn dedup_key(&self) -> (String, String) {
        (self.id.clone(), self.title.clone())
    }
}

/// A narrow, read-only proxy onto the shared C1 session that a probe worker
/// receives instead of the session itself — it can issue calls but can never
/// re-run (or race) `initialize()`.
#[derive(Clone)]
pub struct TransportProxy {
    session: Arc<TransportSession>,
}

impl TransportProxy {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self { session }
    }

    pub async fn jsonrpc<P, R>(&self, method: &str, params: P, opts: JsonRpcOpts) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        self.session.jsonrpc(method, params, opts).await
    }

    pub async fn sse_probe(&self, opts: SseProbeOpts) -> Result<SseProbeResult> {
        self.session.sse_probe(opts).await
    }

    pub async fn transcript(&self) -> Transcript {
        self.session.transcript().await
    }
}

/// Append-only evidence sink a probe writes to while it runs; the
/// orchestrator drains it into the probe's returned findings' evidence only
/// by convention — probes are expected to attach evidence to the findings
/// they return directly. The sink exists for evidence a probe wants to
/// surface even when it does not (yet) have a specific finding to attach it
/// to, e.g. raw call traces used only for debugging a later run.
#[derive(Clone, Default)]
pub struct EvidenceSink {
    inner: Arc<std::sync::Mutex<Vec<EvidencePointer>>>,
}

impl EvidenceSink {
    pub fn push(&self, pointer: EvidencePointer) {
        self.inner.lock().unwrap().push(pointer);
    }

    pub fn drain(&self) -> Vec<EvidencePointer> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }
}

/// Handle passed to each probe: endpoint, merged headers, the transport
/// proxy, an evidence sink, a probe-scoped logger target, the deterministic
/// flag, and optional capability slots (pattern-memory lookups, the shared
/// rate-limit governor).
#[derive(Clone)]
pub struct DiagnosticContext {
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub transport: TransportProxy,
    pub evidence: EvidenceSink,
    pub deterministic: bool,
    pub pattern_memory: Option<Arc<PatternStore>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl DiagnosticContext {
    /// Build a rate-limit key encoding `{providerId, callerPolicyClass}`, the
    /// convention every outbound-third-party probe call MUST use.
    pub fn rate_limit_key(provider_id: &str, policy_class: &str) -> String {
        format!("{policy_class}:{provider_id}")
    }
}

/// A registered probe: identifier, title, ordinal (determines both
/// submission and report order), whether it requires an LLM adapter, and
/// its entry point.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn id(&self) -> &str;
    fn title(&self) -> &str;
    fn ordinal(&self) -> u32;
    fn requires_llm(&self) -> bool {
        false
    }
    async fn run(&self, ctx: &DiagnosticContext) -> Result<Vec<Finding>>;
}

/// Monotonic counter handed out to built-in probes that do not care about a
/// specific ordinal value but must still sort deterministically by
/// registration order.
pub fn next_ordinal() -> u32 {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst) as u32
}
