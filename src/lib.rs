//! Parley: multi-session, tool-augmented conversation engine
//!
//! Drives a remote completion model through repeated rounds of tool calls
//! until it produces a final answer. Each session keeps its own history;
//! tool traffic lives only for the turn that produced it, and long
//! histories are compacted on user-turn boundaries.
//!
//! # Quick Start
//!
//! ```no_run
//! use parley::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> parley::error::Result<()> {
//! let weather = FnCapability::new(
//!     "get_weather",
//!     "Current weather for a city",
//!     CapabilityParameters::object()
//!         .string("city", "City name", true)
//!         .build(),
//!     |args| async move {
//!         let city = args
//!             .as_ref()
//!             .and_then(|a| a.get_str_opt("city"))
//!             .unwrap_or("unknown")
//!             .to_string();
//!         Ok(json!({ "city": city, "forecast": "sunny" }))
//!     },
//! );
//! let registry = CapabilityRegistry::new().with(weather)?;
//!
//! let engine = Engine::from_env(registry)?;
//! let answer = engine.process_message("user-42", "Weather in Paris?").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod tools;
pub mod types;
pub mod util;
