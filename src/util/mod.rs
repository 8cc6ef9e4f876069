//! Utility modules: retry, formatting.

pub mod format;
pub mod retry;
