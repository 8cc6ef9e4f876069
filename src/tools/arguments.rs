//! Typed access to parsed tool call arguments.

use serde_json::Value;

use crate::error::ParleyError;

/// Parsed JSON arguments handed to a capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    fn missing(kind: &str, key: &str) -> ParleyError {
        ParleyError::InvalidArgument(format!("Missing {kind} argument: {key}"))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ParleyError> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ParleyError> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ParleyError> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ParleyError> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing("boolean", key))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>, ParleyError> {
        self.value
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| Self::missing("array", key))
    }

    /// Deserialize the whole argument object into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, ParleyError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            ParleyError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}
