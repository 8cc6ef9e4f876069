//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Local validation failure; history was not touched.
    Validation,
    /// Tool catalogue and capability registry disagree.
    Registry,
    ToolExecution,
    RateLimit,
    Network,
    Server,
    Api,
    Configuration,
    Serialization,
    IterationLimit,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    FixInput,
    CheckToolRegistry,
    CheckToolImplementation,
    CheckConfiguration,
    StartNewTurn,
    ContactSupport,
}
