//! The plugin kernel: metadata, lifecycle, capability dispatch,
//! extension points and the hook chain.
//!
//! Plugins are supplied statically at startup (no runtime discovery) and
//! registered into a [`Kernel`] owned by the caller. After `start_all` the
//! registry is read-only, so lookups are lock-free in practice.

pub mod facets;
pub mod hooks;
pub mod meta;
pub mod plugin;
pub mod registry;

pub use facets::{
    ChannelAdapter, Communicator, LlmProvider, ObserveSink, SessionObserver, ToolProvider,
    WalletProvider,
};
pub use hooks::{CtxKey, Hook, HookContext};
pub use meta::{Capability, PluginMeta};
pub use plugin::Plugin;
pub use registry::Kernel;
