//! Name-to-capability lookup consulted by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use super::tool::Capability;
use crate::dispatch::RESET_HISTORY;
use crate::error::ParleyError;
use crate::provider::ToolDefinition;

/// Immutable-after-construction map of capabilities, in registration order.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, capability: impl Capability + 'static) -> Result<Self, ParleyError> {
        self.register(Arc::new(capability))?;
        Ok(self)
    }

    /// Register a capability. Re-registering a name replaces the previous entry.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), ParleyError> {
        let name = capability.name().to_string();
        if name == RESET_HISTORY {
            return Err(ParleyError::Configuration(format!(
                "'{RESET_HISTORY}' is reserved for the engine"
            )));
        }
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!(capability = %name, "Replacing previously registered capability");
        } else {
            self.order.push(name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tool definitions for every registered capability, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(|cap| ToolDefinition {
                name: cap.name().to_string(),
                description: cap.description().to_string(),
                parameters: cap.parameters().schema.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.order)
            .finish()
    }
}
