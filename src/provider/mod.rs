//! Completion provider trait and implementations.
//!
//! The remote text-generation service is a black box behind
//! [`CompletionProvider`]; the engine never talks HTTP directly.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::ParleyError;
use crate::types::{Message, ToolCallRequest, Usage};

/// One completion request: the full history plus the tool catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What the model produced for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl CompletionResponse {
    /// A plain text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A response requesting tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Core trait implemented by completion backends.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs (e.g., "openai").
    fn provider_name(&self) -> &str;

    /// Perform one remote completion call. No retries happen here.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ParleyError>;
}

/// Create the default HTTP provider from configuration.
#[allow(unused_variables)]
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn CompletionProvider>, ParleyError> {
    #[cfg(feature = "openai")]
    {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ParleyError::Configuration("Missing OPENAI_API_KEY".into()))?;
        let mut provider = openai::OpenAiProvider::new(api_key, config.base_url.clone());
        if let Some(proxy_url) = &config.proxy_url {
            provider = provider.with_proxy(proxy_url)?;
        }
        Ok(Box::new(provider))
    }
    #[cfg(not(feature = "openai"))]
    {
        Err(ParleyError::Configuration(
            "No completion provider enabled via feature flags".into(),
        ))
    }
}
