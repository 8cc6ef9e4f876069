//! Per-session conversation history.

pub mod store;

pub use store::{ConversationStore, SessionInfo, StoreSettings};
