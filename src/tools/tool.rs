//! Capability trait and closure-based adapters.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::arguments::ToolArguments;
use super::types::CapabilityParameters;
use crate::error::ParleyError;

/// A named unit of external functionality the model can invoke.
///
/// Implementations must tolerate concurrent invocation. Failures are returned,
/// never handled inside the capability; the dispatcher isolates them per call.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name the model uses to call this capability.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &CapabilityParameters;

    /// Invoke with parsed arguments, or `None` when the model sent none.
    ///
    /// A `Value::String` result is recorded verbatim; any other value is
    /// serialized to JSON text.
    async fn invoke(&self, args: Option<ToolArguments>) -> Result<Value, ParleyError>;
}

type AsyncHandler = dyn Fn(Option<ToolArguments>) -> Pin<Box<dyn Future<Output = Result<Value, ParleyError>> + Send>>
    + Send
    + Sync;

/// Capability backed by an async closure.
pub struct FnCapability {
    name: String,
    description: String,
    parameters: CapabilityParameters,
    handler: Arc<AsyncHandler>,
}

impl FnCapability {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: CapabilityParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(Option<ToolArguments>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ParleyError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &CapabilityParameters {
        &self.parameters
    }

    async fn invoke(&self, args: Option<ToolArguments>) -> Result<Value, ParleyError> {
        (self.handler)(args).await
    }
}

impl std::fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

type BlockingHandler = dyn Fn(Option<ToolArguments>) -> Result<Value, ParleyError> + Send + Sync;

/// Capability backed by a synchronous closure.
///
/// The closure runs on tokio's blocking pool so it never stalls the executor
/// that drives the rest of the batch.
pub struct BlockingCapability {
    name: String,
    description: String,
    parameters: CapabilityParameters,
    handler: Arc<BlockingHandler>,
}

impl BlockingCapability {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: CapabilityParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(Option<ToolArguments>) -> Result<Value, ParleyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl Capability for BlockingCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &CapabilityParameters {
        &self.parameters
    }

    async fn invoke(&self, args: Option<ToolArguments>) -> Result<Value, ParleyError> {
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler(args))
            .await
            .map_err(|join_error| ParleyError::tool(self.name.clone(), join_error.to_string()))?
    }
}

impl std::fmt::Debug for BlockingCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingCapability")
            .field("name", &self.name)
            .finish()
    }
}
