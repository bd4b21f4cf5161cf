//! A handful of illustrative probes wired into the default registry.
//!
//! Per spec, probe *heuristics* are out of scope for this crate — these
//! exist to demonstrate the [`Probe`] contract and exercise the transport
//! proxy, rate limiter, and pattern-memory capability slots end to end.
//! A real deployment registers its own probe catalogue the same way.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::orchestrator::types::{next_ordinal, DiagnosticContext, EvidencePointer, Finding, Probe, Severity};
use crate::ratelimit::RetryConfig;
use crate::transport::session::JsonRpcOpts;

/// Confirms the server actually reported a `protocolVersion` during the
/// handshake and surfaces it as an informational finding.
pub struct HandshakeSummaryProbe {
    ordinal: u32,
}

impl HandshakeSummaryProbe {
    pub fn new() -> Self {
        Self { ordinal: next_ordinal() }
    }
}

impl Default for HandshakeSummaryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HandshakeSummaryProbe {
    fn id(&self) -> &str {
        "transport.handshake_summary"
    }

    fn title(&self) -> &str {
        "Handshake summary"
    }

    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    async fn run(&self, ctx: &DiagnosticContext) -> Result<Vec<Finding>> {
        let transcript = ctx.transport.transcript().await;
        let findings = match transcript.initialize_result {
            Some(summary) => vec![Finding::new(
                "transport.handshake_summary",
                "transport",
                Severity::Info,
                "server reported a supported protocol version",
                format!(
                    "{} negotiated protocol {}",
                    summary.server_name, summary.protocol_version
                ),
            )],
            None => vec![Finding::new(
                "transport.handshake_summary",
                "transport",
                Severity::Major,
                "no initialize result on transcript",
                "the transport proxy observed no completed handshake",
            )],
        };
        Ok(findings)
    }
}

/// Issues a harmless `tools/list` call to confirm the server responds to a
/// basic post-handshake request, routing it through the shared rate limiter
/// under the `system:` policy class per the orchestrator's integration
/// contract.
pub struct ToolsListProbe {
    ordinal: u32,
}

impl ToolsListProbe {
    pub fn new() -> Self {
        Self { ordinal: next_ordinal() }
    }
}

impl Default for ToolsListProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for ToolsListProbe {
    fn id(&self) -> &str {
        "capability.tools_list"
    }

    fn title(&self) -> &str {
        "tools/list responds"
    }

    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    async fn run(&self, ctx: &DiagnosticContext) -> Result<Vec<Finding>> {
        let key = DiagnosticContext::rate_limit_key("mcp-server", "system");
        let config = RetryConfig {
            min_interval: Duration::ZERO,
            max_retries: 1,
            backoff_factor: 2.0,
        };

        let call = || {
            let transport = ctx.transport.clone();
            async move {
                transport
                    .jsonrpc::<_, serde_json::Value>("tools/list", serde_json::json!({}), JsonRpcOpts::default())
                    .await
            }
        };

        let outcome = match &ctx.rate_limiter {
            Some(limiter) => limiter.with_rate_limit(&key, &config, None, call).await,
            None => call().await,
        };

        let finding = match outcome {
            Ok(value) => {
                let tool_count = value.get("tools").and_then(|t| t.as_array()).map(|a| a.len()).unwrap_or(0);
                let mut f = Finding::new(
                    "capability.tools_list",
                    "capability",
                    Severity::Info,
                    "tools/list responded",
                    format!("server advertised {tool_count} tool(s)"),
                );
                f.confidence = Some(1.0);
                f
            }
            Err(e) => {
                let mut f = Finding::new(
                    "capability.tools_list",
                    "capability",
                    Severity::Minor,
                    "tools/list failed",
                    e.to_string(),
                );
                f.evidence.push(EvidencePointer::Log { excerpt: e.to_string() });
                f
            }
        };

        Ok(vec![finding])
    }
}
