//! Convenience re-exports for common use.

pub use crate::client::RateLimitedClient;
pub use crate::config::{EngineConfig, ExecutionMode, ProviderConfig};
pub use crate::dispatch::{CallResult, Dispatcher, ExecutionStrategy, RESET_HISTORY};
pub use crate::engine::{Engine, TurnReport};
pub use crate::error::{ParleyError, Result};
pub use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse, ToolDefinition};
pub use crate::session::{ConversationStore, StoreSettings};
pub use crate::tools::{
    BlockingCapability, Capability, CapabilityParameters, CapabilityRegistry, FnCapability,
    ToolArguments,
};
pub use crate::types::{Message, Role, ToolCallRequest, ToolOutcome, Usage};
