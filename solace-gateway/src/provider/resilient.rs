//! Provider wrapper that retries failed completions with exponential backoff.

use super::{Provider, UpstreamError};
use crate::retry::{retry_with_backoff_when, RetryPolicy};
use crate::session::ConversationTurn;
use async_trait::async_trait;
use std::sync::Arc;

/// Retries every classified failure except a missing credential, including
/// timeouts, and returns the last error once the policy is exhausted.
pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, UpstreamError> {
        retry_with_backoff_when(
            &self.policy,
            self.inner.name(),
            || self.inner.complete(turns),
            UpstreamError::is_retryable,
        )
        .await
    }
}
