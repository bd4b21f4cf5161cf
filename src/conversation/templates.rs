//! Fix templates: named, reusable remediation skeletons the manager binds
//! to an enriched finding. Authoring the prose itself is out of scope;
//! this module owns the id/lookup surface and dispatch by finding id.

use std::collections::HashMap;

use crate::orchestrator::types::RiskLevel;

/// A named fix template a finding's `template_id` can reference.
#[derive(Debug, Clone)]
pub struct FixTemplate {
    pub id: String,
    pub title: String,
    pub risk_level: RiskLevel,
    /// Whether this template's fix is safe to apply without human review.
    pub auto_fix: bool,
    pub files_to_modify: Vec<String>,
    pub code_changes: String,
    pub validation_steps: Vec<String>,
}

/// A small in-memory catalogue of fix templates, keyed by id, with a
/// dotted-namespace-prefix dispatch table mapping finding ids to templates.
#[derive(Default)]
pub struct TemplateLibrary {
    templates: HashMap<String, FixTemplate>,
    triggers: Vec<(String, String)>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: FixTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Any finding whose id starts with `finding_id_prefix` dispatches to
    /// `template_id`. Longer prefixes win on overlap.
    pub fn register_trigger(&mut self, finding_id_prefix: impl Into<String>, template_id: impl Into<String>) {
        self.triggers.push((finding_id_prefix.into(), template_id.into()));
    }

    pub fn get(&self, id: &str) -> Option<&FixTemplate> {
        self.templates.get(id)
    }

    /// The template bound to the longest registered prefix of `finding_id`,
    /// if any trigger matches.
    pub fn dispatch(&self, finding_id: &str) -> Option<&FixTemplate> {
        self.triggers
            .iter()
            .filter(|(prefix, _)| finding_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, template_id)| self.get(template_id))
    }

    /// The built-in templates covering this crate's own probe catalogue.
    /// A real deployment registers its own templates alongside its probes.
    pub fn with_builtins() -> Self {
        let mut lib = Self::new();

        lib.register(FixTemplate {
            id: "transport-reconnect".to_string(),
            title: "Re-establish the MCP transport session".to_string(),
            risk_level: RiskLevel::Medium,
            auto_fix: false,
            files_to_modify: vec!["mcp server transport configuration".to_string()],
            code_changes: "Verify the endpoint is reachable and that the initialize handshake \
                completes before any probe is retried."
                .to_string(),
            validation_steps: vec![
                "Re-run diagnose against the endpoint".to_string(),
                "Confirm transport.handshake_summary no longer reports a missing initialize result".to_string(),
            ],
        });
        lib.register_trigger("transport.", "transport-reconnect");

        lib.register(FixTemplate {
            id: "probe-timeout-budget".to_string(),
            title: "Raise the probe wall-clock budget".to_string(),
            risk_level: RiskLevel::Low,
            auto_fix: true,
            files_to_modify: vec!["diagnostic run configuration".to_string()],
            code_changes: "Increase the per-probe timeout, or reduce the probe's own network retries \
                so it fits inside the existing budget."
                .to_string(),
            validation_steps: vec!["Re-run the probe with the higher budget and confirm it completes".to_string()],
        });
        lib.register_trigger("probe.timeout", "probe-timeout-budget");

        lib.register(FixTemplate {
            id: "probe-crash-isolate".to_string(),
            title: "Harden a crashing probe".to_string(),
            risk_level: RiskLevel::Medium,
            auto_fix: false,
            files_to_modify: vec!["probe implementation".to_string()],
            code_changes: "Catch the underlying error inside the probe and convert it to a finding \
                instead of letting it propagate out of the worker."
                .to_string(),
            validation_steps: vec!["Re-run the probe and confirm probe.crash no longer appears".to_string()],
        });
        lib.register_trigger("probe.crash", "probe-crash-isolate");

        lib.register(FixTemplate {
            id: "rate-limit-fairness".to_string(),
            title: "Route outbound calls through the shared rate limiter".to_string(),
            risk_level: RiskLevel::Low,
            auto_fix: false,
            files_to_modify: vec!["probe implementation".to_string()],
            code_changes: "Wrap the outbound call in ctx.rate_limiter using a {providerId, callerPolicyClass} key."
                .to_string(),
            validation_steps: vec!["Confirm the orchestrator's rate-limit compliance warning no longer appears".to_string()],
        });
        lib.register_trigger("ratelimit.", "rate-limit-fairness");

        lib
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str) -> FixTemplate {
        FixTemplate {
            id: id.to_string(),
            title: "Retry with exponential backoff".to_string(),
            risk_level: RiskLevel::Low,
            auto_fix: true,
            files_to_modify: vec![],
            code_changes: String::new(),
            validation_steps: vec![],
        }
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let mut lib = TemplateLibrary::new();
        lib.register(template("retry-with-backoff"));
        assert!(lib.get("retry-with-backoff").is_some());
        assert!(lib.get("missing").is_none());
    }

    #[test]
    fn dispatch_prefers_longest_matching_prefix() {
        let mut lib = TemplateLibrary::new();
        lib.register(template("generic"));
        lib.register(template("specific"));
        lib.register_trigger("transport.", "generic");
        lib.register_trigger("transport.handshake", "specific");

        let hit = lib.dispatch("transport.handshake_summary").unwrap();
        assert_eq!(hit.id, "specific");
    }

    #[test]
    fn builtins_dispatch_known_finding_prefixes() {
        let lib = TemplateLibrary::with_builtins();
        assert_eq!(lib.dispatch("transport.handshake_summary").unwrap().id, "transport-reconnect");
        assert_eq!(lib.dispatch("probe.timeout").unwrap().id, "probe-timeout-budget");
        assert_eq!(lib.dispatch("probe.crash").unwrap().id, "probe-crash-isolate");
        assert_eq!(lib.dispatch("ratelimit.unfair_call").unwrap().id, "rate-limit-fairness");
        assert!(lib.dispatch("capability.tools_list").is_none());
    }
}
