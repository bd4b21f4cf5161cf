//! C4: the probe orchestrator. Owns one [`TransportSession`] per run, spawns
//! a bounded-parallelism, sandboxed worker per selected probe, then
//! normalizes (dedups, enriches, truncates, exit-code-maps) the merged
//! finding set into a [`Report`].

pub mod probes;
pub mod registry;
pub mod report;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::pattern_memory::{PatternStore, QueryParams};
use crate::ratelimit::RateLimiter;
use crate::transport::TransportSession;

pub use registry::ProbeRegistry;
pub use report::{ProviderSection, Report, ReportError, ReportSummary};
pub use types::{DiagnosticContext, EvidencePointer, Finding, Probe, Severity, TransportProxy};

/// Inputs to a single diagnostic run.
#[derive(Clone)]
pub struct RunConfig {
    /// Endpoint under test; also used as the report's `topic` unless a
    /// `question` is supplied.
    pub endpoint: String,
    pub question: Option<String>,
    /// `None` selects every registered probe (equivalent to `all`).
    pub probe_ids: Option<Vec<String>>,
    pub headers: HashMap<String, String>,
    /// Exit code is raised to at least 1 if any finding meets this severity.
    pub severity_gate: Option<Severity>,
    pub output_dir: Option<PathBuf>,
    pub deterministic: bool,
    pub probe_timeout: Duration,
    /// Bounded parallelism; `None` means `min(8, selected probe count)`.
    pub parallelism: Option<usize>,
    /// Cap applied to every evidence pointer before it reaches the report.
    pub evidence_cap: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            question: None,
            probe_ids: None,
            headers: HashMap::new(),
            severity_gate: None,
            output_dir: None,
            deterministic: false,
            probe_timeout: types::DEFAULT_PROBE_TIMEOUT,
            parallelism: None,
            evidence_cap: types::DEFAULT_EVIDENCE_CAP,
        }
    }
}

/// Outcome of a completed run: the normalized report plus the exit code the
/// CLI surface should use.
pub struct RunOutcome {
    pub report: Report,
    pub exit_code: i32,
    pub report_dir: Option<PathBuf>,
}

/// Drives a diagnostic run end-to-end against one transport session and
/// probe registry.
pub struct Orchestrator {
    registry: ProbeRegistry,
    pattern_memory: Option<Arc<PatternStore>>,
    rate_limiter: Option<RateLimiter>,
}

impl Orchestrator {
    pub fn new(registry: ProbeRegistry) -> Self {
        Self {
            registry,
            pattern_memory: None,
            rate_limiter: None,
        }
    }

    pub fn with_pattern_memory(mut self, store: Arc<PatternStore>) -> Self {
        self.pattern_memory = Some(store);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Execute the full plan: handshake, spawn workers, collect findings,
    /// normalize, and (if requested) write report artifacts.
    pub async fn run(&self, session: Arc<TransportSession>, config: RunConfig) -> RunOutcome {
        if let Err(e) = session.initialize().await {
            let mut finding = Finding::new(
                "transport.handshake",
                "transport",
                Severity::Blocker,
                "MCP initialize handshake failed",
                e.to_string(),
            );
            finding.evidence.push(EvidencePointer::Log {
                excerpt: e.to_string(),
            });
            let report = self.build_report(&config, vec![finding], vec![]);
            let report_dir = self.maybe_write(&config, &report);
            return RunOutcome {
                exit_code: report.exit_code(config.severity_gate),
                report,
                report_dir,
            };
        }

        let selected = self.registry.select(config.probe_ids.as_deref());
        if selected.is_empty() {
            let report = self.build_report(&config, vec![], vec![]);
            let report_dir = self.maybe_write(&config, &report);
            return RunOutcome {
                exit_code: report.exit_code(config.severity_gate),
                report,
                report_dir,
            };
        }

        let parallelism = config.parallelism.unwrap_or_else(|| selected.len().min(8)).max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(parallelism));

        let mut handles = Vec::with_capacity(selected.len());
        for probe in selected {
            let ctx = DiagnosticContext {
                endpoint: config.endpoint.clone(),
                headers: config.headers.clone(),
                transport: TransportProxy::new(Arc::clone(&session)),
                evidence: types::EvidenceSink::default(),
                deterministic: config.deterministic,
                pattern_memory: self.pattern_memory.clone(),
                rate_limiter: self.rate_limiter.clone(),
            };
            let semaphore = Arc::clone(&semaphore);
            let timeout = config.probe_timeout;
            let probe_id = probe.id().to_string();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let outcome = tokio::time::timeout(timeout, probe.run(&ctx)).await;
                (probe_id, outcome)
            }));
        }

        let mut findings_by_probe: Vec<(u32, Vec<Finding>)> = Vec::new();
        let mut errors = Vec::new();

        // Re-derive ordinal to report results in registered order regardless
        // of completion order.
        let ordinals: HashMap<String, u32> = self
            .registry
            .select(config.probe_ids.as_deref())
            .into_iter()
            .map(|p| (p.id().to_string(), p.ordinal()))
            .collect();

        for handle in handles {
            match handle.await {
                Ok((probe_id, Ok(Ok(findings)))) => {
                    let ordinal = ordinals.get(&probe_id).copied().unwrap_or(u32::MAX);
                    findings_by_probe.push((ordinal, findings));
                }
                Ok((probe_id, Ok(Err(e)))) => {
                    let ordinal = ordinals.get(&probe_id).copied().unwrap_or(u32::MAX);
                    let mut finding = Finding::new(
                        "probe.crash",
                        "orchestrator",
                        Severity::Major,
                        format!("probe '{probe_id}' crashed"),
                        e.to_string(),
                    );
                    finding.evidence.push(EvidencePointer::Log { excerpt: e.to_string() });
                    errors.push(ReportError {
                        provider_id: probe_id,
                        message: e.to_string(),
                        evidence: None,
                    });
                    findings_by_probe.push((ordinal, vec![finding]));
                }
                Ok((probe_id, Err(_elapsed))) => {
                    let ordinal = ordinals.get(&probe_id).copied().unwrap_or(u32::MAX);
                    let mut finding = Finding::new(
                        "probe.timeout",
                        "orchestrator",
                        Severity::Minor,
                        format!("probe '{probe_id}' timed out"),
                        format!("probe '{probe_id}' exceeded its wall-clock budget"),
                    );
                    finding.evidence.push(EvidencePointer::Log {
                        excerpt: probe_id.clone(),
                    });
                    errors.push(ReportError {
                        provider_id: probe_id,
                        message: "timed out".to_string(),
                        evidence: None,
                    });
                    findings_by_probe.push((ordinal, vec![finding]));
                }
                Err(join_err) => {
                    let mut finding = Finding::new(
                        "probe.crash",
                        "orchestrator",
                        Severity::Major,
                        "probe task panicked",
                        join_err.to_string(),
                    );
                    finding.evidence.push(EvidencePointer::Log { excerpt: join_err.to_string() });
                    findings_by_probe.push((u32::MAX, vec![finding]));
                }
            }
        }

        findings_by_probe.sort_by_key(|(ordinal, _)| *ordinal);
        let mut all_findings: Vec<Finding> = Vec::new();
        for (_, mut findings) in findings_by_probe {
            dedup_within_probe(&mut findings);
            all_findings.append(&mut findings);
        }

        let transcript = session.transcript().await;
        if let Some(summary) = &transcript.initialize_result {
            let mut finding = Finding::new(
                "transport.transcript",
                "transport",
                Severity::Info,
                "transport session summary",
                format!(
                    "negotiated protocol {} with server {} {}; {} recent exchange(s) recorded",
                    summary.protocol_version,
                    summary.server_name,
                    summary.server_version,
                    transcript.recent.len()
                ),
            );
            finding.tags = Some(vec!["transcript".to_string()]);
            all_findings.push(finding);
        }

        self.enrich(&mut all_findings);
        self.truncate_evidence(&mut all_findings, config.evidence_cap);

        let report = self.build_report(&config, all_findings, errors);
        let report_dir = self.maybe_write(&config, &report);

        RunOutcome {
            exit_code: report.exit_code(config.severity_gate),
            report,
            report_dir,
        }
    }

    /// Attach the top matching pattern's recommendation to any finding that
    /// lacks one, provided that pattern's confidence exceeds 0.7.
    fn enrich(&self, findings: &mut [Finding]) {
        let Some(store) = &self.pattern_memory else {
            return;
        };
        for finding in findings.iter_mut() {
            if finding.recommendation.is_some() {
                continue;
            }
            let query = QueryParams {
                signature: format!("{} {}", finding.title, finding.description),
                limit: 1,
                min_confidence: 0.7,
                ..Default::default()
            };
            if let Ok(mut matches) = store.query_patterns(query) {
                if let Some(top) = matches.pop() {
                    if top.confidence > 0.7 {
                        if let Some(text) = top.solution.get("recommendation").and_then(|v| v.as_str()) {
                            finding.recommendation = Some(text.to_string());
                        } else {
                            finding.recommendation = Some(top.solution.to_string());
                        }
                    }
                }
            }
        }
    }

    fn truncate_evidence(&self, findings: &mut [Finding], cap: usize) {
        for finding in findings.iter_mut() {
            for pointer in finding.evidence.iter_mut() {
                pointer.truncate(cap);
            }
        }
    }

    fn build_report(&self, config: &RunConfig, findings: Vec<Finding>, errors: Vec<ReportError>) -> Report {
        let requested = config
            .probe_ids
            .as_ref()
            .map(|ids| ids.len())
            .unwrap_or_else(|| self.registry.len());
        let responded = requested.saturating_sub(errors.len());

        let providers = group_by_area(&findings);

        Report {
            topic: config.endpoint.clone(),
            question: config.question.clone(),
            timestamp: Utc::now(),
            providers,
            summary: ReportSummary {
                total_findings: findings.len(),
                providers_requested: requested,
                providers_responded: responded,
                errors,
            },
            findings,
            artifacts: None,
        }
    }

    fn maybe_write(&self, config: &RunConfig, report: &Report) -> Option<PathBuf> {
        let dir = config.output_dir.as_ref()?;
        report.write_artifacts(dir).ok()
    }
}

/// Group findings by area into report-level provider sections (area acts as
/// the `providerId`/`providerName` pair for the shared report schema).
fn group_by_area(findings: &[Finding]) -> Vec<ProviderSection> {
    let mut order: Vec<String> = Vec::new();
    let mut by_area: HashMap<String, Vec<Finding>> = HashMap::new();
    for finding in findings {
        if !by_area.contains_key(&finding.area) {
            order.push(finding.area.clone());
        }
        by_area.entry(finding.area.clone()).or_default().push(finding.clone());
    }
    order
        .into_iter()
        .map(|area| {
            let findings = by_area.remove(&area).unwrap_or_default();
            ProviderSection {
                provider_id: area.clone(),
                provider_name: area,
                findings,
            }
        })
        .collect()
}

/// Fold findings sharing `(id, title)` within one probe's output into one;
/// cross-probe collisions are preserved (this runs before findings from
/// different probes are concatenated).
fn dedup_within_probe(findings: &mut Vec<Finding>) {
    let mut seen = std::collections::HashSet::new();
    findings.retain(|f| seen.insert(f.dedup_key()));
}
