//! Capabilities the model can call, and the registry that names them.

pub mod arguments;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use registry::CapabilityRegistry;
pub use tool::{BlockingCapability, Capability, FnCapability};
pub use types::{CapabilityParameters, ParameterBuilder};
