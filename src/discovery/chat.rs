//! Chat-completions discovery provider.
//!
//! Sends the task prompt as a single user message to an OpenAI-compatible
//! `/chat/completions` endpoint (typically a search-enabled model) and reads
//! a JSON array of URLs out of the first choice.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{DiscoveryClient, DiscoveryError};
use crate::config::DiscoveryConfig;
use crate::http_client::build_http_client;

/// Longest error body kept in [`DiscoveryError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Discovery provider backed by a chat-completions API.
#[derive(Clone)]
pub struct ChatSearchClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for ChatSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSearchClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl ChatSearchClient {
    /// Creates a client for `api_url` using `model`.
    ///
    /// An empty `api_key` sends no `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Client`] if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let client =
            build_http_client(request_timeout).map_err(|e| DiscoveryError::Client(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Creates a client from the `[discovery]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Client`] if the HTTP client cannot be built.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Self::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Model name sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl DiscoveryClient for ChatSearchClient {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn search(&self, prompt: &str) -> Result<Vec<String>, DiscoveryError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "discovery request failed");
            DiscoveryError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(status = status.as_u16(), "discovery provider returned error status");
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::UnexpectedFormat(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "discovery token usage"
            );
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DiscoveryError::UnexpectedFormat("response has no message content".into()))?;

        let urls = parse_url_list(&content)?;
        debug!(count = urls.len(), "discovery returned candidates");
        Ok(urls)
    }
}

/// Removes a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
#[must_use]
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

/// Parses model output into candidate strings.
///
/// Non-string array items are kept as their JSON text so they are counted
/// as invalid downstream rather than silently dropped.
fn parse_url_list(content: &str) -> Result<Vec<String>, DiscoveryError> {
    let stripped = strip_code_fences(content);
    let value: Value = serde_json::from_str(stripped).map_err(|e| {
        DiscoveryError::UnexpectedFormat(format!("content is not JSON ({e}): {stripped}"))
    })?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(|item| match item {
                Value::String(url) => url,
                other => other.to_string(),
            })
            .collect()),
        other => Err(DiscoveryError::UnexpectedFormat(format!(
            "expected a JSON array, got: {other}"
        ))),
    }
}
