//! A generic OpenAI-compatible chat-completion adapter, reachable over HTTP.
//!
//! Mirrors the request/response shape shared by most self-hosted and hosted
//! chat APIs (a `messages` array in, one `choices[0].message.content` out).
//! Provider-specific quirks (function-calling schemas, vendor headers) are
//! out of scope — this adapter only needs to satisfy [`LlmAdapter`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{CortexDxError, Result};
use crate::llm::{ChatMessage, ChatOptions, LlmAdapter, ModelInfo};

/// Connection details for a chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Per-capability model override (key is a [`crate::llm::SessionTypeHint::preferred_capability`]
    /// string, e.g. `"code-oriented"`). A capability absent from this map
    /// falls back to `model`.
    pub model_by_capability: HashMap<String, String>,
}

pub struct HttpChatAdapter {
    client: Client,
    config: HttpAdapterConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireReplyMessage,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    content: String,
}

impl HttpChatAdapter {
    pub fn new(config: HttpAdapterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!(CortexDxError::LlmAdapter(e.to_string())))?;
        Ok(Self { client, config })
    }

    /// The model to send for this call: the hint's preferred capability,
    /// if an override is configured for it, otherwise the adapter's default.
    fn model_for(&self, options: &ChatOptions) -> &str {
        options
            .session_type_hint
            .and_then(|hint| self.config.model_by_capability.get(hint.preferred_capability()))
            .map(|s| s.as_str())
            .unwrap_or(&self.config.model)
    }

    async fn chat_completion(&self, wire_messages: Vec<WireMessage<'_>>, options: &ChatOptions) -> Result<String> {
        let request = ChatRequest {
            model: self.model_for(options),
            messages: wire_messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            seed: options.deterministic_seed,
        };

        let mut builder = self.client.post(format!("{}/chat/completions", self.config.base_url)).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(CortexDxError::LlmAdapter(e.to_string())))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(CortexDxError::LlmAdapter(format!(
                "chat completion request failed with status {}",
                response.status()
            ))));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!(CortexDxError::LlmAdapter(e.to_string())))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!(CortexDxError::LlmAdapter("empty choices array".to_string())))
    }
}

#[async_trait]
impl LlmAdapter for HttpChatAdapter {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let options = ChatOptions { max_tokens, ..Default::default() };
        self.chat_completion(vec![WireMessage { role: "user", content: prompt }], &options).await
    }

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let mut wire: Vec<WireMessage<'_>> = Vec::with_capacity(messages.len() + 1);
        if let Some(system_prompt) = &options.system_prompt {
            wire.push(WireMessage { role: "system", content: system_prompt });
        }
        wire.extend(messages.iter().map(|m| WireMessage { role: &m.role, content: &m.content }));
        self.chat_completion(wire, options).await
    }

    async fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: self.config.model.clone(),
            version: "unknown".to_string(),
            capabilities: vec!["code-oriented".to_string(), "reasoning-oriented".to_string()],
            context_window: 8192,
        })
    }
}
