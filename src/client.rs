//! Completion client with rate-limit backoff.

use std::sync::Arc;

use tracing::debug;

use crate::error::ParleyError;
use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use crate::util::retry::RetryPolicy;

/// Wraps a provider so every call transparently retries on rate limits.
///
/// Only rate-limit failures are retried; anything else reaches the caller
/// on the first attempt.
#[derive(Clone)]
pub struct RateLimitedClient {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ParleyError> {
        debug!(
            provider = self.provider.provider_name(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Requesting completion"
        );
        self.policy
            .execute(|| self.provider.complete(request))
            .await
    }
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("provider", &self.provider.provider_name())
            .field("policy", &self.policy)
            .finish()
    }
}
