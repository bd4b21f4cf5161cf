//! Report artifacts: `research.json` and `research.md`, written under
//! `<outputDir>/<slug(topic-or-endpoint)>/<timestamp>/` per the external
//! report-file contract.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::orchestrator::types::{Finding, Severity};

/// One probe's contribution to the report, named `provider` to match the
/// external report-file contract shared with non-MCP diagnostic callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    pub provider_id: String,
    pub provider_name: String,
    pub findings: Vec<Finding>,
}

/// One probe-level failure (crash or timeout) folded into the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportError {
    pub provider_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_findings: usize,
    pub providers_requested: usize,
    pub providers_responded: usize,
    pub errors: Vec<ReportError>,
}

/// The full diagnostic report, serialized verbatim to `research.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub providers: Vec<ProviderSection>,
    pub findings: Vec<Finding>,
    pub summary: ReportSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
}

impl Report {
    /// Maximum severity across every finding, `None` for an empty report.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Exit code per §4.4: max-severity mapping, escalated to at least 1 if
    /// `severity_gate` is met by any finding.
    pub fn exit_code(&self, severity_gate: Option<Severity>) -> i32 {
        let mapped = self.max_severity().map(Severity::exit_code).unwrap_or(0);
        let gated = match severity_gate {
            Some(gate) if self.findings.iter().any(|f| f.severity >= gate) => mapped.max(1),
            _ => mapped,
        };
        gated
    }

    /// Lowercase, hyphenated slug used for the report directory name.
    pub fn slug(topic_or_endpoint: &str) -> String {
        let mut slug = String::with_capacity(topic_or_endpoint.len());
        let mut last_was_dash = false;
        for c in topic_or_endpoint.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_was_dash = false;
            } else if !last_was_dash {
                slug.push('-');
                last_was_dash = true;
            }
        }
        slug.trim_matches('-').to_string()
    }

    /// Write both `research.json` and `research.md` under
    /// `<output_dir>/<slug>/<timestamp>/`, returning that directory.
    pub fn write_artifacts(&self, output_dir: &Path) -> Result<PathBuf> {
        let slug = Self::slug(self.question.as_deref().unwrap_or(&self.topic));
        let dir = output_dir.join(slug).join(self.timestamp.format("%Y%m%dT%H%M%SZ").to_string());
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join("research.json"), json)?;
        std::fs::write(dir.join("research.md"), self.render_markdown())?;

        Ok(dir)
    }

    /// Render the Markdown companion report: topic/question/timestamp/
    /// provider counts/finding count header, then one section per provider
    /// listing each finding's title, severity, optional confidence
    /// percentage, description, and first evidence reference.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Diagnostic report: {}\n\n", self.topic));
        if let Some(question) = &self.question {
            out.push_str(&format!("**Question:** {question}\n\n"));
        }
        out.push_str(&format!("**Timestamp:** {}\n\n", self.timestamp.to_rfc3339()));
        out.push_str(&format!(
            "**Providers:** {}/{} responded · **Findings:** {}\n\n",
            self.summary.providers_responded, self.summary.providers_requested, self.summary.total_findings
        ));

        if !self.summary.errors.is_empty() {
            out.push_str("## Errors\n\n");
            for err in &self.summary.errors {
                out.push_str(&format!("- `{}`: {}\n", err.provider_id, err.message));
            }
            out.push('\n');
        }

        for provider in &self.providers {
            out.push_str(&format!("## {}\n\n", provider.provider_name));
            for finding in &provider.findings {
                out.push_str(&format!("### {} — {:?}", finding.title, finding.severity));
                if let Some(confidence) = finding.confidence {
                    out.push_str(&format!(" ({:.0}%)", confidence * 100.0));
                }
                out.push_str("\n\n");
                out.push_str(&finding.description);
                out.push_str("\n\n");
                if let Some(first) = finding.evidence.first() {
                    out.push_str(&format!("_Evidence: {}_\n\n", describe_evidence(first)));
                }
            }
        }

        out
    }
}

fn describe_evidence(pointer: &crate::orchestrator::types::EvidencePointer) -> String {
    use crate::orchestrator::types::EvidencePointer::*;
    match pointer {
        Url { url, .. } => url.clone(),
        Log { excerpt } => excerpt.chars().take(120).collect(),
        File { path, line_start, line_end } => format!("{path}:{line_start}-{line_end}"),
        Span { trace_id } => format!("trace:{trace_id}"),
    }
}
