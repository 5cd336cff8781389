//! Tool execution for the agent.
//!
//! Tools always resolve to a plain string; failures are strings with an
//! `"Error:"` prefix so the model can read, retry or explain them.

pub mod exec;
pub mod files;
pub mod plugin;

pub use exec::ExecPolicy;
pub use plugin::ToolsPlugin;
