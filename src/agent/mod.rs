//! Agent-side execution: stream consumption, the attempt loop, and the
//! plugin contract.

pub mod executor;
pub mod plugins;
pub mod runtime;

pub use executor::{PluginFailure, StatusSender};
pub use plugins::{Plugin, PluginError, PluginRegistry};
pub use runtime::AgentRuntime;
