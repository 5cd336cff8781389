//! LLM provider plugins.
//!
//! Each provider is a plugin carrying the `llm` capability; only the one
//! matching the configured `provider` id gets registered. Adapters
//! translate between the domain chat types and each provider's wire
//! format.

pub mod ollama;
pub mod ppq;
mod wire;

pub use ollama::OllamaPlugin;
pub use ppq::PpqPlugin;
