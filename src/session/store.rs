//! In-memory conversation store.
//!
//! Each session owns an ordered history whose first entry is the initial
//! prompt (when one is configured). Tool-call and tool-output entries are
//! flagged ephemeral and live only until the turn that produced them is
//! finalized.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{ParleyError, Result};
use crate::types::{Message, Role, ToolCallRequest};
use crate::util::format::value_to_text;

/// Store-level settings, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub initial_prompt: Option<String>,
    pub reset_notice: Option<String>,
    pub compaction_threshold: usize,
    pub compaction_offset: usize,
    pub max_session_messages: Option<usize>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for StoreSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            initial_prompt: config.system_prompt.clone(),
            reset_notice: config.reset_notice.clone(),
            compaction_threshold: config.compaction_threshold,
            compaction_offset: config.compaction_offset,
            max_session_messages: config.max_session_messages,
        }
    }
}

/// Snapshot of a session's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub ephemeral_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    ephemeral: bool,
}

impl Entry {
    fn durable(message: Message) -> Self {
        Self {
            message,
            ephemeral: false,
        }
    }

    fn ephemeral(message: Message) -> Self {
        Self {
            message,
            ephemeral: true,
        }
    }
}

#[derive(Debug)]
struct Session {
    entries: Vec<Entry>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

/// Owns every session's history. Safe to share behind an `Arc`.
///
/// Sessions are created on first access, so callers never see a
/// "session not found" condition.
#[derive(Debug)]
pub struct ConversationStore {
    settings: StoreSettings,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

impl ConversationStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initial_entries(&self) -> Vec<Entry> {
        self.settings
            .initial_prompt
            .iter()
            .map(|prompt| Entry::durable(Message::system(prompt.clone())))
            .collect()
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            info!(session_id, "New session");
            let now = Utc::now();
            Session {
                entries: self.initial_entries(),
                created_at: now,
                last_active: now,
            }
        });
        session.last_active = Utc::now();
        f(session)
    }

    /// Current history. With `include_prompt == false` the initial prompt is
    /// left out.
    pub fn get(&self, session_id: &str, include_prompt: bool) -> Vec<Message> {
        let skip = usize::from(!include_prompt && self.settings.initial_prompt.is_some());
        self.with_session(session_id, |session| {
            session
                .entries
                .iter()
                .skip(skip)
                .map(|e| e.message.clone())
                .collect()
        })
    }

    /// Append a message given its role name. Unknown roles are rejected and
    /// leave history untouched.
    pub fn add(&self, session_id: &str, content: impl Into<String>, role: &str) -> Result<()> {
        let role = Role::parse(role)?;
        self.push(session_id, Message::new(role, content));
        Ok(())
    }

    /// Append a typed message.
    pub fn push(&self, session_id: &str, message: Message) {
        debug!(session_id, role = %message.role, "Message added");
        self.with_session(session_id, |session| {
            session.entries.push(Entry::durable(message));
        });
    }

    /// Replace the whole history. The list is validated first and nothing
    /// changes unless all of it is acceptable. Ephemeral marks are cleared.
    pub fn set_messages(&self, session_id: &str, messages: Vec<Message>) -> Result<()> {
        self.validate_list(&messages)?;
        self.with_session(session_id, |session| {
            session.entries = messages.into_iter().map(Entry::durable).collect();
        });
        Ok(())
    }

    fn validate_list(&self, messages: &[Message]) -> Result<()> {
        let invalid = |index: usize, reason: &str| ParleyError::InvalidMessageList {
            index,
            reason: reason.to_string(),
        };

        // without a prompt the empty list is a fresh session
        if let Some(prompt) = &self.settings.initial_prompt {
            let first = messages
                .first()
                .ok_or_else(|| invalid(0, "message list is empty"))?;
            if first.role != Role::System || first.content.as_deref() != Some(prompt.as_str()) {
                return Err(invalid(0, "first message must be the initial prompt"));
            }
        }

        let mut pending: HashSet<&str> = HashSet::new();
        for (index, message) in messages.iter().enumerate() {
            if !message.tool_calls.is_empty() && message.role != Role::Assistant {
                return Err(invalid(index, "only assistant messages may carry tool calls"));
            }
            pending.extend(message.tool_calls.iter().map(|c| c.id.as_str()));
            if message.role == Role::Tool {
                let call_id = message
                    .tool_call_id
                    .as_deref()
                    .ok_or_else(|| invalid(index, "tool message without tool_call_id"))?;
                if !pending.remove(call_id) {
                    return Err(invalid(
                        index,
                        "tool message does not answer a preceding tool call",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Append the assistant message carrying a tool-call batch, marked ephemeral.
    pub fn record_tool_call(
        &self,
        session_id: &str,
        content: Option<String>,
        calls: &[ToolCallRequest],
    ) {
        debug!(session_id, calls = calls.len(), "Recording tool-call batch");
        let message = Message::tool_calls(content, calls.to_vec());
        self.with_session(session_id, |session| {
            session.entries.push(Entry::ephemeral(message));
        });
    }

    /// Append a tool output, marked ephemeral. Non-string content is
    /// serialized to JSON text.
    pub fn record_tool_output(&self, session_id: &str, call_id: &str, name: &str, content: &Value) {
        let message = Message::tool_output(call_id, name, value_to_text(content));
        self.with_session(session_id, |session| {
            session.entries.push(Entry::ephemeral(message));
        });
    }

    /// Drop every ephemeral entry in one pass, keeping the rest in order.
    /// Returns how many entries were removed.
    pub fn purge_ephemeral(&self, session_id: &str) -> usize {
        let removed = self.with_session(session_id, |session| {
            let before = session.entries.len();
            session.entries.retain(|e| !e.ephemeral);
            before - session.entries.len()
        });
        if removed > 0 {
            debug!(session_id, removed, "Purged tool messages");
        }
        removed
    }

    /// Number of ephemeral entries currently held.
    pub fn ephemeral_count(&self, session_id: &str) -> usize {
        self.with_session(session_id, |session| {
            session.entries.iter().filter(|e| e.ephemeral).count()
        })
    }

    /// Restore the initial prompt, followed by the reset notice if configured.
    pub fn reset(&self, session_id: &str) {
        let mut entries = self.initial_entries();
        if let Some(notice) = &self.settings.reset_notice {
            entries.push(Entry::durable(Message::system(notice.clone())));
        }
        self.with_session(session_id, |session| {
            session.entries = entries;
        });
        info!(session_id, "History reset");
    }

    /// Turn-aligned trim once history reaches the compaction threshold.
    ///
    /// Keeps position 0, then everything from the first `user` message at or
    /// after the compaction offset. With no such message only position 0
    /// survives. Returns whether anything was dropped.
    pub fn compact(&self, session_id: &str) -> bool {
        let threshold = self.settings.compaction_threshold;
        let offset = self.settings.compaction_offset;

        self.with_session(session_id, |session| {
            let len = session.entries.len();
            if len < threshold || len == 0 {
                return false;
            }
            let boundary = session
                .entries
                .iter()
                .enumerate()
                .skip(offset)
                .find(|(_, e)| e.message.role == Role::User)
                .map(|(idx, _)| idx)
                .unwrap_or(len);

            let tail = session.entries.split_off(boundary);
            session.entries.truncate(1);
            session.entries.extend(tail);
            debug!(
                session_id,
                before = len,
                after = session.entries.len(),
                boundary,
                "Compacted history"
            );
            true
        })
    }

    /// Reinitialize the session if it holds more messages than the
    /// configured bound. Returns whether it was reinitialized.
    pub fn enforce_size_limit(&self, session_id: &str) -> bool {
        let Some(max) = self.settings.max_session_messages else {
            return false;
        };
        let initial = self.initial_entries();
        let cleared = self.with_session(session_id, |session| {
            if session.entries.len() <= max {
                return false;
            }
            session.entries = initial;
            true
        });
        if cleared {
            info!(session_id, max, "Session exceeded size limit, reinitialized");
        }
        cleared
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Drop a session entirely. Returns whether it existed.
    pub fn delete(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Bookkeeping for an existing session, without creating one.
    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.lock().get(session_id).map(|session| SessionInfo {
            session_id: session_id.to_string(),
            message_count: session.entries.len(),
            ephemeral_count: session.entries.iter().filter(|e| e.ephemeral).count(),
            created_at: session.created_at,
            last_active: session.last_active,
        })
    }
}
