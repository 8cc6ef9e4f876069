//! Text rendering of tool results.

use serde_json::Value;

/// Render a capability result as history text.
///
/// Strings are kept verbatim; every other JSON value is serialized.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
