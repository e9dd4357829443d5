//! Tool plugins for the gift-finder conversational agent.
//!
//! From the LLM's point of view a plugin is a callable "tool": it has a name,
//! a description and a JSON schema for its arguments. The registry owns the
//! plugins and turns every call, including failed ones, into a JSON payload
//! the model can read.

mod plugin;
mod registry;

pub use plugin::{Plugin, PluginError, PluginOutput, Result};
pub use registry::{PluginRegistry, ToolSpec};
