//! Chat request handling.
//!
//! A request moves through `validate → rate check → credential check →
//! exchange`. Everything before the exchange short-circuits without touching
//! session state or the upstream. The exchange holds the session lock from the
//! user turn to the assistant turn, so concurrent messages in one session are
//! applied one at a time and in arrival order.

use crate::provider::{ApiKeySource, Provider, UpstreamError};
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use crate::session::{ConversationTurn, HistoryError, SessionStore};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use solace_common::util::preview;
use solace_common::SessionSettings;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the conversation id, in both directions.
pub const SESSION_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_CHARS: usize = 128;

const MSG_NOT_UNDERSTOOD: &str = "I didn't catch that. Could you please try again?";
const MSG_TOO_QUICK: &str =
    "You're sending messages a bit quickly. Please take a breath and try again in a moment.";
const MSG_NOT_CONFIGURED: &str =
    "I'm not available right now because my service isn't fully set up. Please try again later.";
const MSG_HIGH_DEMAND: &str =
    "I'm experiencing high demand right now. Please try again in a moment.";
const MSG_TROUBLE_CONNECTING: &str =
    "I'm having trouble connecting to my services right now. Please try again in a moment.";

// ============================================================================
// Errors
// ============================================================================

/// Why a request was rejected before reaching the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    #[error("request body is not a JSON object")]
    MalformedBody,

    #[error("request body exceeds the size limit")]
    BodyTooLarge,

    #[error("message is missing or not a string")]
    MissingMessage,

    #[error("message is blank")]
    BlankMessage,

    #[error("message has {chars} characters, limit is {max}")]
    MessageTooLong { chars: usize, max: usize },

    #[error("session id is not 1-128 characters of [A-Za-z0-9_-]")]
    InvalidSessionId,
}

/// Chat request failure, rendered as `{ reply }` with a user-safe message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(#[from] InvalidRequest),

    #[error("rate limit exceeded")]
    RateLimitExceeded(RateLimitStatus),

    #[error("upstream API key is not configured")]
    Configuration,

    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(InvalidRequest::BodyTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the user. Never includes upstream detail.
    pub fn reply(&self) -> String {
        match self {
            Self::Validation(InvalidRequest::MessageTooLong { max, .. }) => format!(
                "That's a bit long for me. Could you share it in {max} characters or fewer?"
            ),
            Self::Validation(InvalidRequest::BodyTooLarge) => {
                "That's a bit long for me. Could you share a shorter message?".into()
            }
            Self::Validation(_) => MSG_NOT_UNDERSTOOD.into(),
            Self::RateLimitExceeded(_) => MSG_TOO_QUICK.into(),
            Self::Configuration => MSG_NOT_CONFIGURED.into(),
            Self::Upstream(UpstreamError::RateLimited) => MSG_HIGH_DEMAND.into(),
            Self::Upstream(_) | Self::Internal(_) => MSG_TROUBLE_CONNECTING.into(),
        }
    }
}

impl From<HistoryError> for ChatError {
    fn from(e: HistoryError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ReplyBody {
    reply: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status_code(),
            Json(ReplyBody {
                reply: self.reply(),
            }),
        )
            .into_response();

        if let Self::RateLimitExceeded(status) = &self {
            let headers = response.headers_mut();
            insert_rate_limit_headers(headers, status);
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(reset_secs(status)),
            );
        }
        response
    }
}

/// Add `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset`.
pub fn insert_rate_limit_headers(headers: &mut axum::http::HeaderMap, status: &RateLimitStatus) {
    headers.insert(
        HeaderName::from_static("ratelimit-limit"),
        HeaderValue::from(status.limit),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from(status.remaining),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-reset"),
        HeaderValue::from(reset_secs(status)),
    );
}

// whole seconds, rounded up so clients never retry early
fn reset_secs(status: &RateLimitStatus) -> u64 {
    let reset = status.reset_after;
    reset.as_secs() + u64::from(reset.subsec_nanos() > 0)
}

// ============================================================================
// Service
// ============================================================================

/// Inbound chat request after HTTP extraction.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Parsed JSON body, or `None` when the body was not JSON.
    pub body: Option<Value>,
    /// Raw `X-Session-Id` value, if sent.
    pub session_id: Option<String>,
    /// Rate-limit identity of the caller.
    pub client_key: String,
}

/// Successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub session_id: String,
    pub rate_limit: Option<RateLimitStatus>,
}

/// Chat service parameters.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub max_message_chars: usize,
    pub session_ttl: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_chars: 500,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&SessionSettings> for ChatSettings {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            max_message_chars: settings.max_message_chars,
            session_ttl: settings.ttl(),
        }
    }
}

/// Coordinates validation, rate limiting, session state and the upstream call.
#[derive(Clone)]
pub struct ChatService {
    sessions: SessionStore,
    limiter: Option<RateLimiter>,
    provider: Arc<dyn Provider>,
    keys: Arc<dyn ApiKeySource>,
    settings: ChatSettings,
}

impl ChatService {
    /// `limiter` is `None` when rate limiting is disabled.
    pub fn new(
        sessions: SessionStore,
        limiter: Option<RateLimiter>,
        provider: Arc<dyn Provider>,
        keys: Arc<dyn ApiKeySource>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            sessions,
            limiter,
            provider,
            keys,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    pub fn api_key_configured(&self) -> bool {
        self.keys.is_configured()
    }

    /// Handle one chat message end to end.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let message = match extract_message(request.body.as_ref(), self.settings.max_message_chars)
        {
            Ok(message) => message,
            Err(e) => {
                tracing::info!(client = %request.client_key, reason = %e, "Rejected chat request");
                return Err(e.into());
            }
        };
        let session_id = match request.session_id.as_deref() {
            Some(id) => validate_session_id(id).map_err(|e| {
                tracing::info!(client = %request.client_key, reason = %e, "Rejected chat request");
                ChatError::from(e)
            })?,
            None => uuid::Uuid::new_v4().to_string(),
        };

        tracing::info!(
            session_id = %session_id,
            message = %preview(&message),
            "Chat request received"
        );

        let rate_limit = match &self.limiter {
            Some(limiter) => {
                let decision = limiter.check(&request.client_key);
                if !decision.is_allowed() {
                    tracing::warn!(
                        client = %request.client_key,
                        limit = decision.status().limit,
                        "Chat request rate limited"
                    );
                    return Err(ChatError::RateLimitExceeded(decision.status()));
                }
                Some(decision.status())
            }
            None => None,
        };

        if !self.keys.is_configured() {
            tracing::error!("Chat request refused: upstream API key is not configured");
            return Err(ChatError::Configuration);
        }

        // Spawned so that a client disconnect does not abandon a half-finished
        // exchange; the session is still updated when the upstream answers.
        let exchange = tokio::spawn(run_exchange(
            self.sessions.clone(),
            Arc::clone(&self.provider),
            self.settings.session_ttl,
            session_id.clone(),
            message,
        ));

        let reply = exchange
            .await
            .map_err(|e| ChatError::Internal(format!("exchange task failed: {e}")))
            .and_then(|result| result)
            .map_err(|e| {
                match &e {
                    ChatError::Upstream(upstream) => tracing::error!(
                        session_id = %session_id,
                        kind = upstream.kind(),
                        status = ?upstream.status_code(),
                        error = %upstream,
                        "Chat exchange failed"
                    ),
                    other => tracing::error!(
                        session_id = %session_id,
                        error = %other,
                        "Chat exchange failed"
                    ),
                }
                e
            })?;

        tracing::info!(
            session_id = %session_id,
            reply = %preview(&reply),
            "Chat reply sent"
        );

        Ok(ChatReply {
            reply,
            session_id,
            rate_limit,
        })
    }
}

async fn run_exchange(
    sessions: SessionStore,
    provider: Arc<dyn Provider>,
    ttl: Duration,
    session_id: String,
    message: String,
) -> Result<String, ChatError> {
    let mut session = sessions.acquire(&session_id).await;
    if session.is_new() {
        tracing::debug!(session_id = %session_id, "Started new conversation");
    }

    // Stays in history even if the upstream call fails.
    session.append(ConversationTurn::user(message))?;

    let reply = provider.complete(session.history().turns()).await?;

    session.append(ConversationTurn::assistant(reply.clone()))?;
    sessions.schedule_expiry(&session_id, ttl);
    tracing::debug!(
        session_id = %session_id,
        turns = session.history().len(),
        "Conversation updated"
    );
    Ok(reply)
}

/// Pull a valid `message` out of the request body.
pub fn extract_message(body: Option<&Value>, max_chars: usize) -> Result<String, InvalidRequest> {
    let body = body
        .filter(|b| b.is_object())
        .ok_or(InvalidRequest::MalformedBody)?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .ok_or(InvalidRequest::MissingMessage)?;

    if message.trim().is_empty() {
        return Err(InvalidRequest::BlankMessage);
    }
    let chars = message.chars().count();
    if chars > max_chars {
        return Err(InvalidRequest::MessageTooLong {
            chars,
            max: max_chars,
        });
    }
    Ok(message.to_string())
}

/// Accept a client-supplied session id.
pub fn validate_session_id(id: &str) -> Result<String, InvalidRequest> {
    let valid = !id.is_empty()
        && id.chars().count() <= MAX_SESSION_ID_CHARS
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id.to_string())
    } else {
        Err(InvalidRequest::InvalidSessionId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_message_at_limit() {
        let body = json!({ "message": "a".repeat(500) });
        assert!(extract_message(Some(&body), 500).is_ok());
    }

    #[test]
    fn rejects_message_over_limit() {
        let body = json!({ "message": "a".repeat(501) });
        assert_eq!(
            extract_message(Some(&body), 500),
            Err(InvalidRequest::MessageTooLong { chars: 501, max: 500 })
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let body = json!({ "message": "é".repeat(500) });
        assert!(extract_message(Some(&body), 500).is_ok());
    }

    #[test]
    fn rejects_missing_blank_and_non_string_messages() {
        assert_eq!(
            extract_message(None, 500),
            Err(InvalidRequest::MalformedBody)
        );
        assert_eq!(
            extract_message(Some(&json!(["hi"])), 500),
            Err(InvalidRequest::MalformedBody)
        );
        assert_eq!(
            extract_message(Some(&json!({})), 500),
            Err(InvalidRequest::MissingMessage)
        );
        assert_eq!(
            extract_message(Some(&json!({ "message": 42 })), 500),
            Err(InvalidRequest::MissingMessage)
        );
        assert_eq!(
            extract_message(Some(&json!({ "message": "  \n" })), 500),
            Err(InvalidRequest::BlankMessage)
        );
    }

    #[test]
    fn session_id_charset_and_length() {
        assert!(validate_session_id("abc-DEF_123").is_ok());
        assert!(validate_session_id(&"x".repeat(128)).is_ok());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("../etc").is_err());
    }

    #[test]
    fn upstream_rate_limit_gets_distinct_reply() {
        let throttled = ChatError::Upstream(UpstreamError::RateLimited);
        let down = ChatError::Upstream(UpstreamError::Network("refused".into()));
        assert!(throttled.reply().contains("high demand"));
        assert!(down.reply().contains("trouble connecting"));
        assert_eq!(throttled.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_detail_never_reaches_the_reply() {
        let err = ChatError::Upstream(UpstreamError::MalformedResponse(
            "secret upstream body".into(),
        ));
        assert!(!err.reply().contains("secret"));
    }

    #[test]
    fn rate_limited_response_carries_headers() {
        let response = ChatError::RateLimitExceeded(RateLimitStatus {
            limit: 15,
            remaining: 0,
            reset_after: Duration::from_millis(41_500),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["ratelimit-limit"], "15");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "42");
        assert_eq!(headers["retry-after"], "42");
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ChatError::from(InvalidRequest::BlankMessage).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChatError::Configuration.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
