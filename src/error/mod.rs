//! Error types for Parley.

pub mod unified;

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

pub use unified::{ErrorCategory, RecoverySuggestion};

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Invalid role '{role}', must be one of: system, user, assistant, tool")]
    InvalidRole { role: String },

    #[error("Invalid message list at position {index}: {reason}")]
    InvalidMessageList { index: usize, reason: String },

    #[error("Unknown tool '{name}' (available: {available:?})")]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Model kept requesting tools after {0} iterations")]
    MaxIterationsExceeded(usize),
}

fn rate_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b429\b|rate[ _-]?limit").expect("rate limit pattern is valid")
    })
}

impl ParleyError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRole { .. } | Self::InvalidMessageList { .. } => {
                ErrorCategory::Validation
            }
            Self::InvalidArgument(_) => ErrorCategory::Validation,
            Self::UnknownTool { .. } => ErrorCategory::Registry,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::MaxIterationsExceeded(_) => ErrorCategory::IterationLimit,
            Self::Api { status, .. } => match status {
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
        }
    }

    /// Whether this failure is a rate-limit signal from the remote service.
    ///
    /// Matches on the typed variant, a 429 status, or the message text, since
    /// some gateways only report throttling in the error body.
    pub fn is_rate_limit(&self) -> bool {
        if self.category() == ErrorCategory::RateLimit {
            return true;
        }
        match self {
            Self::Api { message, .. } => rate_limit_pattern().is_match(message),
            Self::Network(_) => rate_limit_pattern().is_match(&self.to_string()),
            _ => false,
        }
    }

    /// Server-provided wait before retrying, when the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Validation => RecoverySuggestion::FixInput,
            ErrorCategory::Registry => RecoverySuggestion::CheckToolRegistry,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::IterationLimit => RecoverySuggestion::StartNewTurn,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
