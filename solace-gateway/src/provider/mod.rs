//! Upstream completion providers.
//!
//! A [`Provider`] turns an ordered conversation into a single assistant reply.
//! Failures are classified into [`UpstreamError`] at this boundary so the chat
//! service can choose a user-facing message without inspecting transport
//! details.

mod completion;
mod resilient;

pub use completion::ChatCompletionProvider;
pub use resilient::ResilientProvider;

use crate::session::ConversationTurn;
use async_trait::async_trait;
use solace_common::config::API_KEY_ENV;
use thiserror::Error;

// ============================================================================
// Provider Trait
// ============================================================================

/// Completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used in log records.
    fn name(&self) -> &str;

    /// Produce the assistant reply for `turns`, which starts with the system turn.
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, UpstreamError>;
}

/// Classified upstream failure.
///
/// Messages carry diagnostic detail for logs only; they are never sent to
/// HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Credential rejected (401/403).
    #[error("upstream rejected credentials (status {status})")]
    Auth { status: u16 },

    /// Upstream throttled the relay (429).
    #[error("upstream rate limited the request")]
    RateLimited,

    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The attempt exceeded its timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// Any other non-success status.
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },

    /// 2xx without a usable reply.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// No API key was configured when the call was made.
    #[error("API key is not configured")]
    MissingCredential,
}

impl UpstreamError {
    /// HTTP status returned by the upstream, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Auth { status } | Self::Upstream { status } => Some(*status),
            Self::RateLimited => Some(429),
            _ => None,
        }
    }

    /// Short machine-readable category for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RateLimited => "rate_limited",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Upstream { .. } => "upstream_status",
            Self::MalformedResponse(_) => "malformed_response",
            Self::MissingCredential => "missing_credential",
        }
    }

    /// Whether another attempt could succeed. A missing key stays missing.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingCredential)
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            429 => Self::RateLimited,
            _ => Self::Upstream { status },
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Supplies the upstream API key at call time.
pub trait ApiKeySource: Send + Sync {
    fn api_key(&self) -> Option<String>;

    fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }
}

/// Reads the key from the environment on every call, falling back to a
/// value loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct EnvApiKeySource {
    fallback: Option<String>,
}

impl EnvApiKeySource {
    pub fn new(fallback: Option<String>) -> Self {
        Self {
            fallback: fallback.filter(|k| !k.trim().is_empty()),
        }
    }
}

impl ApiKeySource for EnvApiKeySource {
    fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.fallback.clone())
    }
}

/// Fixed key, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeySource(Option<String>);

impl StaticApiKeySource {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl ApiKeySource for StaticApiKeySource {
    fn api_key(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(UpstreamError::from_status(401), UpstreamError::Auth { status: 401 });
        assert_eq!(UpstreamError::from_status(403), UpstreamError::Auth { status: 403 });
        assert_eq!(UpstreamError::from_status(429), UpstreamError::RateLimited);
        assert_eq!(
            UpstreamError::from_status(502),
            UpstreamError::Upstream { status: 502 }
        );
    }

    #[test]
    fn status_code_only_for_http_failures() {
        assert_eq!(UpstreamError::RateLimited.status_code(), Some(429));
        assert_eq!(UpstreamError::Timeout.status_code(), None);
        assert_eq!(UpstreamError::Network("refused".into()).status_code(), None);
    }

    #[test]
    fn static_key_source() {
        assert!(StaticApiKeySource::new("sk-test").is_configured());
        assert!(!StaticApiKeySource::missing().is_configured());
    }

    #[test]
    fn blank_fallback_is_treated_as_missing() {
        let source = EnvApiKeySource::new(Some("   ".into()));
        assert!(source.fallback.is_none());
    }
}
