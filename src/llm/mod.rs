//! The LLM adapter contract consumed by the conversational session manager
//! (C5). Concrete backends (a hosted chat API, a local model server) live in
//! submodules; prompt authoring and model-specific wire formats are
//! out of scope here — only the seam the rest of the crate depends on.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CortexDxError, Result};

/// A single turn in a chat-style exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Options accepted by [`LlmAdapter::chat`] and [`LlmAdapter::stream`].
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    /// When set, the adapter MUST pin temperature to 0 and this seed.
    pub deterministic_seed: Option<u64>,
    /// When set, an adapter that maintains per-capability model overrides
    /// should route this call to the model preferred for the hint.
    pub session_type_hint: Option<SessionTypeHint>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: None,
            deterministic_seed: None,
            session_type_hint: None,
        }
    }
}

impl ChatOptions {
    /// Apply the deterministic-seed contract: temperature 0, pinned seed.
    pub fn with_deterministic_seed(mut self, seed: u64) -> Self {
        self.temperature = 0.0;
        self.deterministic_seed = Some(seed);
        self
    }

    pub fn with_session_type_hint(mut self, hint: SessionTypeHint) -> Self {
        self.session_type_hint = Some(hint);
        self
    }
}

/// Static model metadata returned by [`LlmAdapter::get_model_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub context_window: usize,
}

/// Hint used to pick a model suited to the session's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTypeHint {
    Development,
    Debugging,
    Learning,
}

impl SessionTypeHint {
    /// `development -> code-oriented`, `debugging -> reasoning-oriented`,
    /// `learning -> explanation-oriented`.
    pub fn preferred_capability(self) -> &'static str {
        match self {
            SessionTypeHint::Development => "code-oriented",
            SessionTypeHint::Debugging => "reasoning-oriented",
            SessionTypeHint::Learning => "explanation-oriented",
        }
    }
}

/// A streamed chunk of adapter output.
pub type StreamChunk = Result<String>;

/// `{complete, chat, stream, getModelInfo}` per the external LLM adapter
/// contract. `stream` has a default that reports unsupported — a sync-only
/// backend need not implement it.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<std::pin::Pin<Box<dyn futures::Stream<Item = StreamChunk> + Send>>> {
        Err(anyhow::anyhow!(CortexDxError::LlmAdapter(
            "this adapter does not support streaming".to_string()
        )))
    }

    async fn get_model_info(&self) -> Result<ModelInfo>;
}
