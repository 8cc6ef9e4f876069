//! Orchestration loop: drives one user message through model calls and tool
//! rounds until the model produces a final answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::client::RateLimitedClient;
use crate::config::{EngineConfig, ProviderConfig};
use crate::dispatch::{reset_history_definition, strategy_for, DispatchMessages, Dispatcher};
use crate::error::{ParleyError, Result};
use crate::provider::{self, CompletionProvider, CompletionRequest, ToolDefinition};
use crate::session::{ConversationStore, StoreSettings};
use crate::tools::CapabilityRegistry;
use crate::types::{Message, Usage};

/// Receives the model's interim text while it is calling tools.
/// Arguments are the session id and the text.
pub type InterimHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Result of one completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// Final answer, trimmed.
    pub answer: String,
    /// Model calls made during the turn.
    pub iterations: usize,
    /// Token usage summed over every model call in the turn.
    pub usage: Usage,
}

/// Multi-session, tool-augmented conversation engine.
///
/// ```no_run
/// # async fn demo() -> parley::error::Result<()> {
/// use parley::prelude::*;
///
/// let engine = Engine::from_env(CapabilityRegistry::new())?;
/// let answer = engine.process_message("user-42", "What's the weather in Paris?").await?;
/// println!("{answer}");
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    client: RateLimitedClient,
    store: Arc<ConversationStore>,
    dispatcher: Dispatcher,
    catalogue: Vec<ToolDefinition>,
    interim: Option<InterimHandler>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    /// Create an engine with a fresh in-memory store.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn CompletionProvider>,
        registry: CapabilityRegistry,
    ) -> Result<Self> {
        let store = Arc::new(ConversationStore::new(StoreSettings::from(&config)));
        Self::with_store(config, provider, registry, store)
    }

    /// Create an engine over an existing store.
    pub fn with_store(
        config: EngineConfig,
        provider: Arc<dyn CompletionProvider>,
        registry: CapabilityRegistry,
        store: Arc<ConversationStore>,
    ) -> Result<Self> {
        config.validate()?;

        let mut catalogue = registry.definitions();
        if config.enable_reset_tool {
            catalogue.push(reset_history_definition());
        }

        let strategy = strategy_for(config.execution, config.max_workers);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            strategy,
            Arc::clone(&store),
            DispatchMessages::from(&config),
        )
        .with_reset_enabled(config.enable_reset_tool);
        let client = RateLimitedClient::new(provider, config.retry_policy());

        info!(
            model = %config.model,
            provider = client.provider_name(),
            tools = catalogue.len(),
            execution = %config.execution,
            "Engine ready"
        );

        Ok(Self {
            config,
            client,
            store,
            dispatcher,
            catalogue,
            interim: None,
            turn_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Build from the layered config and `OPENAI_*` credentials.
    pub fn from_env(registry: CapabilityRegistry) -> Result<Self> {
        let config = EngineConfig::load(None)?;
        let provider = provider::create_provider(&ProviderConfig::from_env())?;
        Self::new(config, Arc::from(provider), registry)
    }

    /// Install a handler for interim assistant text.
    pub fn with_interim_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.interim = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Tool definitions advertised to the model.
    pub fn catalogue(&self) -> &[ToolDefinition] {
        &self.catalogue
    }

    /// Session history without the initial prompt.
    pub fn history(&self, session_id: &str) -> Vec<Message> {
        self.store.get(session_id, false)
    }

    pub fn reset_session(&self, session_id: &str) {
        self.store.reset(session_id);
    }

    /// Forget a session. Returns whether it existed.
    ///
    /// Waits for a running turn on the session to finish first. The turn lock
    /// is dropped only when no other turn is queued on it.
    pub async fn end_session(&self, session_id: &str) -> bool {
        let lock = self.turn_lock(session_id);
        let _turn = lock.lock().await;

        let existed = self.store.delete(session_id);
        let mut locks = self.turn_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one held here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
        existed
    }

    fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Answer one user message and return only the answer text.
    pub async fn process_message(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<String> {
        self.run_turn(session_id, text).await.map(|report| report.answer)
    }

    /// Answer one user message.
    ///
    /// Turns on the same session are serialized; different sessions proceed
    /// independently. Tool names are resolved before the tool-call message
    /// is recorded, so an unknown tool leaves no unanswered call behind. On
    /// error the user message stays in history and any tool messages from
    /// the failed turn are purged by the next completed turn.
    pub async fn run_turn(&self, session_id: &str, text: impl Into<String>) -> Result<TurnReport> {
        let lock = self.turn_lock(session_id);
        let _turn = lock.lock().await;

        self.store.enforce_size_limit(session_id);
        self.store.push(session_id, Message::user(text));

        let mut usage = Usage::default();
        for iteration in 1..=self.config.max_iterations {
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: self.store.get(session_id, true),
                tools: self.catalogue.clone(),
                tool_choice: self.config.tool_choice.clone(),
            };
            let response = self.client.complete(&request).await?;
            usage.merge(&response.usage);

            if !response.has_tool_calls() {
                let answer = response.content.as_deref().unwrap_or_default().trim().to_string();
                let purged = self.store.purge_ephemeral(session_id);
                self.store.push(session_id, Message::assistant(answer.clone()));
                let compacted = self.store.compact(session_id);
                info!(
                    session_id,
                    iterations = iteration,
                    purged,
                    compacted,
                    total_tokens = usage.total_tokens,
                    "Turn complete"
                );
                return Ok(TurnReport {
                    answer,
                    iterations: iteration,
                    usage,
                });
            }

            debug!(
                session_id,
                iteration,
                calls = response.tool_calls.len(),
                "Model requested tools"
            );
            let batch = self.dispatcher.resolve(&response.tool_calls)?;
            self.store
                .record_tool_call(session_id, response.content.clone(), batch.calls());
            if let (Some(handler), Some(interim)) = (&self.interim, response.content.as_deref()) {
                if !interim.trim().is_empty() {
                    handler(session_id, interim);
                }
            }
            self.dispatcher.execute(session_id, batch).await;
        }

        warn!(
            session_id,
            max_iterations = self.config.max_iterations,
            "Model never stopped calling tools"
        );
        Err(ParleyError::MaxIterationsExceeded(self.config.max_iterations))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("dispatcher", &self.dispatcher)
            .field("interim", &self.interim.is_some())
            .finish()
    }
}
