//! Per-session state: bounded message history, phase tracking, the
//! per-finding LLM-analysis cache, and the idle-timeout sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::conversation::phase::Phase;
use crate::conversation::templates::TemplateLibrary;
use crate::error::{CortexDxError, Result};
use crate::llm::{ChatMessage, ChatOptions, LlmAdapter};
use crate::orchestrator::types::{Finding, RiskLevel};

/// Default bounded message-history window (spec default M=10).
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
/// Default session idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Token cap applied to cached-analysis prompt construction.
pub const CACHED_ANALYSIS_TOKEN_CAP: usize = 512;

/// A user expertise level, parameterizing the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpertiseLevel {
    Beginner,
    Intermediate,
    Expert,
}

/// A suggested next action inferred from lexical signals in an assistant
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    CodeGeneration,
    FileCreation,
    Configuration,
    Validation,
}

impl SuggestedAction {
    fn infer(response: &str) -> Vec<SuggestedAction> {
        let lower = response.to_ascii_lowercase();
        let mut actions = Vec::new();
        if lower.contains("```") || lower.contains("write the following code") {
            actions.push(SuggestedAction::CodeGeneration);
        }
        if lower.contains("create a file") || lower.contains("new file") {
            actions.push(SuggestedAction::FileCreation);
        }
        if lower.contains("config") || lower.contains("environment variable") {
            actions.push(SuggestedAction::Configuration);
        }
        if lower.contains("run the test") || lower.contains("validate") {
            actions.push(SuggestedAction::Validation);
        }
        actions
    }
}

/// Result of driving one conversational turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub phase: Phase,
    pub suggested_actions: Vec<SuggestedAction>,
}

/// Key used to cache a finding's LLM analysis within a session: duplicate
/// findings reuse the cached result without re-invoking the adapter.
type AnalysisCacheKey = (String, String);

/// A single long-lived conversational session.
pub struct ConversationSession {
    pub id: String,
    phase: Phase,
    history: Vec<ChatMessage>,
    history_window: usize,
    expertise: ExpertiseLevel,
    deterministic_seed: Option<u64>,
    started_at: Instant,
    last_activity: Instant,
    analysis_cache: HashMap<AnalysisCacheKey, String>,
    templates: TemplateLibrary,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, expertise: ExpertiseLevel) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            phase: Phase::Initialization,
            history: Vec::new(),
            history_window: DEFAULT_HISTORY_WINDOW,
            expertise,
            deterministic_seed: None,
            started_at: now,
            last_activity: now,
            analysis_cache: HashMap::new(),
            templates: TemplateLibrary::with_builtins(),
        }
    }

    pub fn with_deterministic_seed(mut self, seed: u64) -> Self {
        self.deterministic_seed = Some(seed);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn push_bounded(&mut self, message: ChatMessage) {
        self.history.push(message);
        if self.history.len() > self.history_window {
            let overflow = self.history.len() - self.history_window;
            self.history.drain(0..overflow);
        }
    }

    /// Build a system prompt parameterized by expertise level and phase.
    /// Never references another session's content.
    fn system_prompt(&self) -> String {
        let expertise = match self.expertise {
            ExpertiseLevel::Beginner => "Explain concepts from first principles, avoid jargon.",
            ExpertiseLevel::Intermediate => "Assume familiarity with MCP and typical client/server diagnostics.",
            ExpertiseLevel::Expert => "Be terse; assume deep protocol and systems knowledge.",
        };
        let phase = match self.phase {
            Phase::Initialization => "Greet the user and clarify what they want diagnosed.",
            Phase::Planning => "Help the user understand the findings and decide next steps.",
            Phase::Tutorial => "Explain the root cause and how the fix works.",
            Phase::Implementation => "Produce concrete code changes that address the finding.",
            Phase::Validation => "Guide the user through confirming the fix worked.",
            Phase::Completed => "The session is finished; summarize the outcome.",
        };
        format!("{expertise} {phase}")
    }

    /// Run one turn: append the user message, build the prompt, invoke the
    /// adapter, advance phase, and infer suggested actions.
    pub async fn turn(&mut self, user_message: &str, adapter: &dyn LlmAdapter) -> Result<TurnOutcome> {
        self.last_activity = Instant::now();
        self.push_bounded(ChatMessage::user(user_message));
        self.phase = self.phase.on_user_message(user_message);

        let mut options = ChatOptions {
            system_prompt: Some(self.system_prompt()),
            session_type_hint: Some(self.phase.session_type_hint()),
            ..Default::default()
        };
        if let Some(seed) = self.deterministic_seed {
            options = options.with_deterministic_seed(seed);
        }

        let response = adapter.chat(&self.history, &options).await?;
        self.push_bounded(ChatMessage::assistant(&response));
        self.phase = self.phase.on_assistant_message(&response);

        Ok(TurnOutcome {
            suggested_actions: SuggestedAction::infer(&response),
            phase: self.phase,
            response,
        })
    }

    /// Explicit tool-driven phase transition, bypassing lexical cues.
    pub fn apply_tool_action(&mut self, action: &str) {
        self.last_activity = Instant::now();
        self.phase = self.phase.on_tool_action(action);
    }

    /// Analyze a finding via the adapter, reusing any cached result for the
    /// same `(finding.id, finding.title)` within this session. The analysis
    /// prompt is capped at [`CACHED_ANALYSIS_TOKEN_CAP`] tokens (estimated
    /// at ~4 characters per token) to bound worst-case cost.
    ///
    /// Populates every enrichment field the conversational manager owns
    /// (`llmAnalysis`, `rootCause`, `filesToModify`, `codeChanges`,
    /// `validationSteps`, `riskLevel`, `canAutoFix`): the labeled sections
    /// of the adapter's response fill in what they cover, and a dispatched
    /// fix template backfills whatever the response left out.
    pub async fn analyze_finding(&mut self, finding: &Finding, adapter: &dyn LlmAdapter) -> Result<Finding> {
        self.last_activity = Instant::now();
        let key = finding.dedup_key();

        let analysis = if let Some(cached) = self.analysis_cache.get(&key) {
            cached.clone()
        } else {
            let prompt = build_bounded_prompt(finding, CACHED_ANALYSIS_TOKEN_CAP);
            let analysis = adapter.complete(&prompt, 1024).await?;
            self.analysis_cache.insert(key, analysis.clone());
            analysis
        };

        let sections = AnalysisSections::parse(&analysis);
        let mut enriched = finding.clone();
        enriched.root_cause = sections.root_cause;
        enriched.files_to_modify = sections.files_to_modify;
        enriched.code_changes = sections.code_changes;
        enriched.validation_steps = sections.validation_steps;
        enriched.risk_level = sections.risk_level;
        enriched.llm_analysis = Some(analysis);

        if let Some(template) = self.templates.dispatch(&finding.id) {
            enriched.template_id.get_or_insert_with(|| template.id.clone());
            enriched.auto_fix.get_or_insert(template.auto_fix);
            enriched.risk_level.get_or_insert(template.risk_level);
            enriched.files_to_modify.get_or_insert_with(|| template.files_to_modify.clone());
            enriched.code_changes.get_or_insert_with(|| template.code_changes.clone());
            enriched.validation_steps.get_or_insert_with(|| template.validation_steps.clone());
        }

        Ok(enriched)
    }

    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_activity.elapsed() >= idle_timeout
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Build a prompt describing `finding`, truncated so its estimated token
/// count (≈4 chars/token) does not exceed `token_cap`. Asks for labeled
/// sections so the response can be parsed back into enrichment fields.
fn build_bounded_prompt(finding: &Finding, token_cap: usize) -> String {
    let char_cap = token_cap * 4;
    let mut prompt = format!(
        "Analyze this diagnostic finding. Respond with one labeled section per line:\n\
         Root cause: <short explanation>\n\
         Files to modify: <comma-separated files or components>\n\
         Code changes: <short description of the change>\n\
         Validation steps: <comma-separated steps>\n\
         Risk level: <low|medium|high>\n\n\
         Title: {}\nSeverity: {:?}\nDescription: {}",
        finding.title, finding.severity, finding.description
    );
    if prompt.len() > char_cap {
        prompt.truncate(char_cap);
    }
    prompt
}

/// Fields parsed out of an adapter's labeled analysis response. Any
/// section the response omits is left `None`.
#[derive(Debug, Default, Clone)]
struct AnalysisSections {
    root_cause: Option<String>,
    files_to_modify: Option<Vec<String>>,
    code_changes: Option<String>,
    validation_steps: Option<Vec<String>>,
    risk_level: Option<RiskLevel>,
}

impl AnalysisSections {
    fn parse(text: &str) -> Self {
        let mut sections = AnalysisSections::default();
        for line in text.lines() {
            let lower = line.to_ascii_lowercase();
            if let Some(rest) = strip_label(&lower, line, "root cause:") {
                sections.root_cause = Some(rest.trim().to_string());
            } else if let Some(rest) = strip_label(&lower, line, "files to modify:") {
                sections.files_to_modify = Some(split_list(rest));
            } else if let Some(rest) = strip_label(&lower, line, "code changes:") {
                sections.code_changes = Some(rest.trim().to_string());
            } else if let Some(rest) = strip_label(&lower, line, "validation steps:") {
                sections.validation_steps = Some(split_list(rest));
            } else if let Some(rest) = strip_label(&lower, line, "risk level:") {
                sections.risk_level = parse_risk_level(rest.trim());
            }
        }
        sections
    }
}

/// If `original`'s lower-cased form starts with `label`, return the
/// remainder of `original` (case preserved) after the label.
fn strip_label<'a>(lower: &str, original: &'a str, label: &str) -> Option<&'a str> {
    if lower.starts_with(label) {
        Some(&original[label.len()..])
    } else {
        None
    }
}

/// Split a comma/semicolon-separated list, trimming and dropping empty parts.
fn split_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_risk_level(s: &str) -> Option<RiskLevel> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        _ => None,
    }
}

/// Process-scoped registry of active conversational sessions, with an
/// explicit init/teardown construction point rather than a module-level
/// singleton lookup.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, ConversationSession>>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    pub async fn create(&self, id: impl Into<String>, expertise: ExpertiseLevel) -> String {
        let id = id.into();
        let session = ConversationSession::new(id.clone(), expertise);
        self.sessions.lock().await.insert(id.clone(), session);
        id
    }

    /// Run one turn against a session. Returns [`CortexDxError::SessionNotFound`]
    /// if the session was never created, already ended, or was swept for
    /// inactivity.
    pub async fn turn(&self, id: &str, user_message: &str, adapter: &dyn LlmAdapter) -> Result<TurnOutcome> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!(CortexDxError::SessionNotFound(id.to_string())))?;
        session.turn(user_message, adapter).await
    }

    pub async fn analyze_finding(&self, id: &str, finding: &Finding, adapter: &dyn LlmAdapter) -> Result<Finding> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!(CortexDxError::SessionNotFound(id.to_string())))?;
        session.analyze_finding(finding, adapter).await
    }

    pub async fn end(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    /// Remove every session idle beyond this manager's configured timeout.
    /// Returns the number of sessions swept.
    pub async fn sweep_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let idle_timeout = self.idle_timeout;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle(idle_timeout));
        before - sessions.len()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelInfo;
    use async_trait::async_trait;

    struct StubAdapter {
        reply: String,
    }

    #[async_trait]
    impl LlmAdapter for StubAdapter {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            Ok(self.reply.clone())
        }
        async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
            Ok(self.reply.clone())
        }
        async fn get_model_info(&self) -> Result<ModelInfo> {
            Ok(ModelInfo {
                name: "stub".to_string(),
                version: "0".to_string(),
                capabilities: vec![],
                context_window: 1024,
            })
        }
    }

    #[tokio::test]
    async fn turn_advances_phase_on_cue() {
        let mut session = ConversationSession::new("s1", ExpertiseLevel::Intermediate);
        let adapter = StubAdapter { reply: "Let's take a look.".to_string() };
        session.turn("please diagnose this endpoint", &adapter).await.unwrap();
        assert_eq!(session.phase(), Phase::Planning);
    }

    #[tokio::test]
    async fn terminal_marker_in_response_completes_session() {
        let mut session = ConversationSession::new("s2", ExpertiseLevel::Intermediate);
        session.apply_tool_action("begin_validation");
        let adapter = StubAdapter { reply: "Great, this is now resolved.".to_string() };
        session.turn("is this fixed?", &adapter).await.unwrap();
        assert_eq!(session.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn history_is_bounded_to_window() {
        let mut session = ConversationSession::new("s3", ExpertiseLevel::Beginner);
        session.history_window = 4;
        let adapter = StubAdapter { reply: "ok".to_string() };
        for i in 0..10 {
            session.turn(&format!("message {i}"), &adapter).await.unwrap();
        }
        assert!(session.history().len() <= 4);
    }

    #[tokio::test]
    async fn duplicate_finding_reuses_cached_analysis() {
        use crate::orchestrator::types::{Finding, Severity};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingAdapter {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl LlmAdapter for CountingAdapter {
            async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok("root cause: timeout".to_string())
            }
            async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
                Ok(String::new())
            }
            async fn get_model_info(&self) -> Result<ModelInfo> {
                Ok(ModelInfo { name: "c".into(), version: "0".into(), capabilities: vec![], context_window: 1 })
            }
        }

        let mut session = ConversationSession::new("s4", ExpertiseLevel::Expert);
        let adapter = CountingAdapter { calls: AtomicUsize::new(0) };
        let finding = Finding::new("x.y", "test", Severity::Minor, "title", "desc");

        session.analyze_finding(&finding, &adapter).await.unwrap();
        session.analyze_finding(&finding, &adapter).await.unwrap();

        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_manager_reports_not_found_after_end() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.create("s5", ExpertiseLevel::Intermediate).await;
        manager.end(&id).await;
        let adapter = StubAdapter { reply: "hi".to_string() };
        let result = manager.turn(&id, "hello", &adapter).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sweep_idle_removes_only_timed_out_sessions() {
        let manager = SessionManager::new(Duration::from_millis(1));
        manager.create("fresh", ExpertiseLevel::Intermediate).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let removed = manager.sweep_idle().await;
        assert_eq!(removed, 1);
        assert!(!manager.exists("fresh").await);
    }

    #[test]
    fn suggested_actions_are_inferred_from_response_text() {
        let actions = SuggestedAction::infer("Here's the config: set an environment variable and run the test.");
        assert!(actions.contains(&SuggestedAction::Configuration));
        assert!(actions.contains(&SuggestedAction::Validation));
    }

    #[test]
    fn analysis_sections_parse_every_labeled_line() {
        let text = "Root cause: handshake never completed\n\
                     Files to modify: src/transport/session.rs, src/main.rs\n\
                     Code changes: retry the initialize call\n\
                     Validation steps: re-run diagnose, confirm exit code 0\n\
                     Risk level: Medium";
        let sections = AnalysisSections::parse(text);
        assert_eq!(sections.root_cause.as_deref(), Some("handshake never completed"));
        assert_eq!(
            sections.files_to_modify,
            Some(vec!["src/transport/session.rs".to_string(), "src/main.rs".to_string()])
        );
        assert_eq!(sections.code_changes.as_deref(), Some("retry the initialize call"));
        assert_eq!(
            sections.validation_steps,
            Some(vec!["re-run diagnose".to_string(), "confirm exit code 0".to_string()])
        );
        assert_eq!(sections.risk_level, Some(crate::orchestrator::types::RiskLevel::Medium));
    }

    #[tokio::test]
    async fn analyze_finding_populates_every_enrichment_field() {
        use crate::orchestrator::types::{Finding, RiskLevel, Severity};

        struct SectionedAdapter;
        #[async_trait]
        impl LlmAdapter for SectionedAdapter {
            async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
                Ok("Root cause: the initialize handshake never completed\n\
                    Files to modify: src/transport/session.rs\n\
                    Code changes: retry initialize with backoff\n\
                    Validation steps: re-run diagnose, confirm transport.handshake_summary is clean\n\
                    Risk level: high"
                    .to_string())
            }
            async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
                Ok(String::new())
            }
            async fn get_model_info(&self) -> Result<ModelInfo> {
                Ok(ModelInfo { name: "s".into(), version: "0".into(), capabilities: vec![], context_window: 1 })
            }
        }

        let mut session = ConversationSession::new("s6", ExpertiseLevel::Expert);
        let adapter = SectionedAdapter;
        let finding = Finding::new(
            "transport.handshake_summary",
            "transport",
            Severity::Major,
            "no initialize result on transcript",
            "the transport proxy observed no completed handshake",
        );

        let enriched = session.analyze_finding(&finding, &adapter).await.unwrap();

        assert!(enriched.llm_analysis.is_some());
        assert_eq!(enriched.root_cause.as_deref(), Some("the initialize handshake never completed"));
        assert_eq!(enriched.files_to_modify, Some(vec!["src/transport/session.rs".to_string()]));
        assert_eq!(enriched.code_changes.as_deref(), Some("retry initialize with backoff"));
        assert_eq!(enriched.risk_level, Some(RiskLevel::High));
        assert_eq!(enriched.template_id.as_deref(), Some("transport-reconnect"));
        assert_eq!(enriched.auto_fix, Some(false));
    }

    #[tokio::test]
    async fn analyze_finding_backfills_from_template_when_response_omits_sections() {
        use crate::orchestrator::types::{Finding, Severity};

        let mut session = ConversationSession::new("s7", ExpertiseLevel::Expert);
        let adapter = StubAdapter { reply: "Looks like a timeout.".to_string() };
        let finding = Finding::new("probe.timeout", "orchestrator", Severity::Minor, "probe timed out", "desc");

        let enriched = session.analyze_finding(&finding, &adapter).await.unwrap();

        assert_eq!(enriched.template_id.as_deref(), Some("probe-timeout-budget"));
        assert_eq!(enriched.auto_fix, Some(true));
        assert!(enriched.validation_steps.is_some());
        assert!(enriched.files_to_modify.is_some());
    }
}
