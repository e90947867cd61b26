//! OpenAI-compatible chat-completion client (DeepSeek by default).

use super::{ApiKeySource, Provider, UpstreamError};
use crate::session::ConversationTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solace_common::util::{sanitize_for_log, truncate_with_ellipsis};
use solace_common::{Error, UpstreamConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOGGED_BODY_CHARS: usize = 200;

/// Chat-completion API client.
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    keys: Arc<dyn ApiKeySource>,
}

impl ChatCompletionProvider {
    /// Create a client using the configured per-attempt timeout.
    pub fn new(config: &UpstreamConfig, keys: Arc<dyn ApiKeySource>) -> solace_common::Result<Self> {
        Self::with_timeout(config, config.timeout(), keys)
    }

    /// Create a client with an explicit per-attempt timeout.
    pub fn with_timeout(
        config: &UpstreamConfig,
        timeout: Duration,
        keys: Arc<dyn ApiKeySource>,
    ) -> solace_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            keys,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Provider for ChatCompletionProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, UpstreamError> {
        let api_key = self.keys.api_key().ok_or(UpstreamError::MissingCredential)?;
        let start = Instant::now();

        let request = CompletionRequest {
            model: &self.model,
            messages: turns,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            turns = turns.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::warn!(endpoint = %self.endpoint, "Completion request timed out");
                    UpstreamError::Timeout
                } else {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        error = %e,
                        "No response received from completion API"
                    );
                    UpstreamError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = UpstreamError::from_status(status.as_u16());
            let body = sanitize_for_log(&truncate_with_ellipsis(&body, LOGGED_BODY_CHARS));
            match err {
                UpstreamError::Auth { .. } => tracing::error!(
                    status = status.as_u16(),
                    body = %body,
                    "Completion API rejected credentials, check the API key"
                ),
                UpstreamError::RateLimited => tracing::warn!(
                    status = status.as_u16(),
                    body = %body,
                    "Completion API rate limit exceeded"
                ),
                _ => tracing::warn!(
                    status = status.as_u16(),
                    body = %body,
                    "Completion API returned an error"
                ),
            }
            return Err(err);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::MalformedResponse(format!("failed to read body: {e}"))
            }
        })?;

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(
                error = %e,
                body = %sanitize_for_log(&truncate_with_ellipsis(&body, LOGGED_BODY_CHARS)),
                "Failed to parse completion response"
            );
            UpstreamError::MalformedResponse(e.to_string())
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                tracing::warn!("Completion response has no reply content");
                UpstreamError::MalformedResponse("missing choices[0].message.content".into())
            })?;

        tracing::debug!(latency_ms, "Completion received");
        Ok(content)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
