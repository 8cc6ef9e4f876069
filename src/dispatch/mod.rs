//! Tool dispatch: resolve a batch of tool calls, run it, record the outcomes.

pub mod strategy;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

pub use strategy::{CallResult, Cooperative, ExecutionStrategy, Invocation, WorkerPool};

use crate::config::{EngineConfig, ExecutionMode};
use crate::error::{ParleyError, Result};
use crate::provider::ToolDefinition;
use crate::session::ConversationStore;
use crate::tools::{Capability, CapabilityRegistry, ToolArguments};
use crate::types::{ToolCallRequest, ToolOutcome};
use crate::util::format::value_to_text;

/// Reserved name of the history-reset pseudo-tool.
pub const RESET_HISTORY: &str = "reset_history";

/// Catalogue entry advertising `reset_history` to the model.
pub fn reset_history_definition() -> ToolDefinition {
    ToolDefinition {
        name: RESET_HISTORY.to_string(),
        description: "Clear the conversation history, keeping only the initial \
                      instructions. Only call this when the user asks to start over, \
                      and never together with other tools."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {},
        }),
    }
}

/// Build the strategy for an execution mode.
pub fn strategy_for(mode: ExecutionMode, max_workers: usize) -> Arc<dyn ExecutionStrategy> {
    match mode {
        ExecutionMode::Cooperative => Arc::new(Cooperative),
        ExecutionMode::WorkerPool => Arc::new(WorkerPool::new(max_workers)),
    }
}

/// Fixed outcome texts the dispatcher substitutes for real results.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchMessages {
    pub error_sentinel: String,
    pub reset_rejection: String,
    pub reset_confirmation: String,
}

impl Default for DispatchMessages {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DispatchMessages {
    fn from(config: &EngineConfig) -> Self {
        Self {
            error_sentinel: config.error_sentinel.clone(),
            reset_rejection: config.reset_rejection.clone(),
            reset_confirmation: config.reset_confirmation.clone(),
        }
    }
}

/// How each request in a batch gets its outcome.
enum Slot {
    /// `reset_history` batched with other calls.
    Rejected,
    /// Arguments were not valid JSON.
    Unparseable,
    /// Index into the executed batch.
    Run(usize),
}

enum Plan {
    /// A lone `reset_history` call.
    Reset,
    /// One entry per call; `None` marks a batched `reset_history`.
    Calls(Vec<Option<Arc<dyn Capability>>>),
}

/// A tool-call batch whose names all resolved.
///
/// Produced by [`Dispatcher::resolve`] before anything is written to
/// history, so an unknown name never leaves an unanswered tool-call message.
pub struct ResolvedBatch {
    calls: Vec<ToolCallRequest>,
    plan: Plan,
}

impl ResolvedBatch {
    pub fn calls(&self) -> &[ToolCallRequest] {
        &self.calls
    }

    pub fn is_reset(&self) -> bool {
        matches!(self.plan, Plan::Reset)
    }
}

impl std::fmt::Debug for ResolvedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBatch")
            .field("calls", &self.calls)
            .field("reset", &self.is_reset())
            .finish()
    }
}

/// Runs tool-call batches against a registry and records the outcomes.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    strategy: Arc<dyn ExecutionStrategy>,
    store: Arc<ConversationStore>,
    messages: DispatchMessages,
    reset_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        strategy: Arc<dyn ExecutionStrategy>,
        store: Arc<ConversationStore>,
        messages: DispatchMessages,
    ) -> Self {
        Self {
            registry,
            strategy,
            store,
            messages,
            reset_enabled: true,
        }
    }

    /// Whether `reset_history` is handled here. When disabled the name is
    /// looked up in the registry like any other, where it is never found.
    pub fn with_reset_enabled(mut self, enabled: bool) -> Self {
        self.reset_enabled = enabled;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Look up every requested name. Any unknown name fails the whole batch.
    pub fn resolve(&self, calls: &[ToolCallRequest]) -> Result<ResolvedBatch> {
        let is_reset = |call: &ToolCallRequest| self.reset_enabled && call.name == RESET_HISTORY;

        if let [only] = calls {
            if is_reset(only) {
                return Ok(ResolvedBatch {
                    calls: calls.to_vec(),
                    plan: Plan::Reset,
                });
            }
        }

        let mut resolved = Vec::with_capacity(calls.len());
        for call in calls {
            if is_reset(call) {
                resolved.push(None);
                continue;
            }
            let capability = self.registry.get(&call.name).ok_or_else(|| {
                warn!(tool = %call.name, "Model requested an unregistered tool");
                ParleyError::UnknownTool {
                    name: call.name.clone(),
                    available: self.registry.names(),
                }
            })?;
            resolved.push(Some(capability));
        }
        Ok(ResolvedBatch {
            calls: calls.to_vec(),
            plan: Plan::Calls(resolved),
        })
    }

    /// Resolve then execute.
    pub async fn dispatch(
        &self,
        session_id: &str,
        calls: &[ToolCallRequest],
    ) -> Result<Vec<ToolOutcome>> {
        let batch = self.resolve(calls)?;
        Ok(self.execute(session_id, batch).await)
    }

    /// Produce one outcome per request, in request order.
    ///
    /// Every failure is confined to its own call and reported as the error
    /// sentinel.
    pub async fn execute(&self, session_id: &str, batch: ResolvedBatch) -> Vec<ToolOutcome> {
        let ResolvedBatch { calls, plan } = batch;
        let resolved = match plan {
            Plan::Reset => {
                self.store.reset(session_id);
                return calls
                    .into_iter()
                    .map(|call| ToolOutcome {
                        call_id: call.id,
                        name: call.name,
                        content: self.messages.reset_confirmation.clone(),
                        is_error: false,
                    })
                    .collect();
            }
            Plan::Calls(resolved) => resolved,
        };

        let mut slots = Vec::with_capacity(calls.len());
        let mut batch = Vec::new();
        for (call, capability) in calls.iter().zip(resolved) {
            let Some(capability) = capability else {
                warn!(session_id, call_id = %call.id, "reset_history requested alongside other tools");
                slots.push(Slot::Rejected);
                continue;
            };
            match call.parsed_arguments() {
                Ok(arguments) => {
                    debug!(
                        session_id,
                        tool = %call.name,
                        arguments = %preview(&call.raw_arguments),
                        "Executing tool"
                    );
                    slots.push(Slot::Run(batch.len()));
                    batch.push(Invocation {
                        call_id: call.id.clone(),
                        capability,
                        arguments: arguments.map(ToolArguments::new),
                    });
                }
                Err(e) => {
                    warn!(session_id, tool = %call.name, error = %e, "Unparseable tool arguments");
                    slots.push(Slot::Unparseable);
                }
            }
        }

        info!(
            session_id,
            calls = calls.len(),
            executing = batch.len(),
            strategy = self.strategy.name(),
            "Dispatching tool batch"
        );
        let mut results: Vec<Option<CallResult>> = self
            .strategy
            .run_batch(batch)
            .await
            .into_iter()
            .map(Some)
            .collect();

        let mut outcomes = Vec::with_capacity(calls.len());
        for (call, slot) in calls.into_iter().zip(slots) {
            let (content, is_error) = match slot {
                Slot::Rejected => (self.messages.reset_rejection.clone(), true),
                Slot::Unparseable => (self.messages.error_sentinel.clone(), true),
                Slot::Run(idx) => match results.get_mut(idx).and_then(Option::take) {
                    Some(CallResult::Success(value)) => (value_to_text(&value), false),
                    Some(CallResult::Failure(reason)) => {
                        warn!(session_id, tool = %call.name, %reason, "Tool failed");
                        (self.messages.error_sentinel.clone(), true)
                    }
                    None => (self.messages.error_sentinel.clone(), true),
                },
            };
            self.store.record_tool_output(
                session_id,
                &call.id,
                &call.name,
                &Value::String(content.clone()),
            );
            outcomes.push(ToolOutcome {
                call_id: call.id,
                name: call.name,
                content,
                is_error,
            });
        }
        outcomes
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("strategy", &self.strategy.name())
            .field("messages", &self.messages)
            .field("reset_enabled", &self.reset_enabled)
            .finish()
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 100;
    match raw.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &raw[..cut]),
        None => raw.to_string(),
    }
}
