use crate::adapter::Responder;
use crate::error::{Stage, VoiceError};
use async_trait::async_trait;
use ringline_types::{Reply, Speaker, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sentinel the model appends when the conversation should conclude.
/// Requested via the system prompt and stripped before synthesis.
const CLOSE_SENTINEL: &str = "[END_CALL]";

/// Reply used when no generation backend is configured. The call still gets
/// an acknowledgment; the max-turn policy bounds the loop.
const UNCONFIGURED_REPLY: &str = "Thanks, I have noted your response.";

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Configuration for the chat-completion response generator.
#[derive(Clone)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API (e.g. `https://api.deepseek.com/v1`).
    pub base_url: String,
    /// Bearer token. `None` disables generation and uses a canned reply.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// System prompt describing the agent's persona and task.
    pub system_prompt: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Completion token cap.
    pub max_tokens: u32,
}

impl GeneratorConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            system_prompt: system_prompt.into(),
            timeout: default_timeout(),
            max_tokens: 150,
        }
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Response generation against an OpenAI-compatible chat completion API.
#[derive(Debug, Clone)]
pub struct GeneratorService {
    config: GeneratorConfig,
    http: reqwest::Client,
}

impl GeneratorService {
    pub fn new(config: GeneratorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    fn build_messages(&self, history: &[Turn], latest: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: format!(
                "{} When the conversation has reached a natural conclusion, \
                 append the token {} to the end of your reply.",
                self.config.system_prompt, CLOSE_SENTINEL
            ),
        });
        for turn in history {
            messages.push(ChatMessage {
                role: match turn.speaker {
                    Speaker::Caller => "user".to_string(),
                    Speaker::Agent => "assistant".to_string(),
                },
                content: turn.text.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: latest.to_string(),
        });
        messages
    }
}

#[async_trait]
impl Responder for GeneratorService {
    async fn respond(&self, history: &[Turn], latest: &str) -> Result<Reply, VoiceError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::debug!("no generator API key configured, using canned reply");
            return Ok(Reply {
                text: UNCONFIGURED_REPLY.to_string(),
                should_close: false,
            });
        };

        let request = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(history, latest),
            max_tokens: self.config.max_tokens,
            temperature: 0.7,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Timeout {
                        stage: Stage::Generation,
                        seconds: self.config.timeout.as_secs(),
                    }
                } else {
                    VoiceError::Generation(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Generation(format!("malformed response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| VoiceError::Generation("response contained no choices".to_string()))?;

        let (text, should_close) = strip_close_sentinel(&content);
        if text.is_empty() {
            return Err(VoiceError::Generation("empty completion".to_string()));
        }

        Ok(Reply { text, should_close })
    }
}

/// Removes the closing sentinel from a completion, reporting whether it was
/// present.
fn strip_close_sentinel(content: &str) -> (String, bool) {
    let should_close = content.contains(CLOSE_SENTINEL);
    let text = content.replace(CLOSE_SENTINEL, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (text, should_close)
}
