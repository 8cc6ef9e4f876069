//! Shared test helpers and mock provider.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use parley::error::ParleyError;
use parley::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use parley::types::*;

/// A mock provider that replays queued replies and captures every request.
pub struct MockProvider {
    replies: Mutex<Vec<Result<CompletionResponse, ParleyError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a final text answer.
    pub fn queue_response(&self, text: &str) {
        self.replies.lock().unwrap().push(Ok(CompletionResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
        }));
    }

    /// Queue a single tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: Value) {
        self.queue_tool_calls(None, &[(id, name, args)]);
    }

    /// Queue a batch of tool calls with optional interim text.
    pub fn queue_tool_calls(&self, content: Option<&str>, calls: &[(&str, &str, Value)]) {
        let tool_calls = calls
            .iter()
            .map(|(id, name, args)| {
                let raw = if args.is_null() {
                    String::new()
                } else {
                    args.to_string()
                };
                ToolCallRequest::new(*id, *name, raw)
            })
            .collect();
        self.replies.lock().unwrap().push(Ok(CompletionResponse {
            content: content.map(str::to_string),
            tool_calls,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }));
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: ParleyError) {
        self.replies.lock().unwrap().push(Err(error));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ParleyError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Ok(CompletionResponse::text("Mock response"));
        }
        replies.remove(0)
    }
}

/// Roles of a history, for compact assertions.
pub fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}
