//! The plugin trait.

use async_trait::async_trait;
use std::sync::Arc;

use cb_domain::config::Config;
use cb_domain::Result;

use crate::facets::{
    ChannelAdapter, Communicator, LlmProvider, ObserveSink, SessionObserver, ToolProvider,
    WalletProvider,
};
use crate::hooks::{Hook, HookContext};
use crate::meta::PluginMeta;
use crate::registry::Kernel;

/// Base trait for all plugins.
///
/// Lifecycle: `register` → `configure(full config)` → `start()` → … →
/// `stop()`. `start` runs in dependency+priority order, `stop` in reverse.
/// Plugins that need collaborators keep the [`std::sync::Weak`] kernel
/// handle passed to `start` and resolve by capability or extension point —
/// never by concrete type.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn meta(&self) -> &PluginMeta;

    /// Receive the full configuration. Called once, before `start`, in
    /// load order. Any failure is fatal at startup.
    fn configure(&self, config: &Config) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// Initialize resources. The kernel reference is valid for the plugin's
    /// lifetime; store a `Weak` if collaborators are needed later.
    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        let _ = kernel;
        Ok(())
    }

    /// Release resources, in reverse start order.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// The hooks this plugin participates in. A plugin is only invoked for
    /// hooks it lists here; the default participates in none.
    fn hooks(&self) -> &'static [Hook] {
        &[]
    }

    /// Handle one hook invocation. Only called for hooks listed by
    /// [`Plugin::hooks`]. Mutate `ctx` in place; set `ctx.abort` to stop
    /// the chain. Errors are absorbed by the kernel and reported through
    /// the `on_error` hook.
    async fn on_hook(&self, hook: Hook, ctx: &mut HookContext) -> Result<()> {
        let _ = (hook, ctx);
        Ok(())
    }

    // ── Capability facets ──────────────────────────────────────────
    // A plugin advertising a capability in its metadata must return the
    // matching facet here.

    fn as_llm(&self) -> Option<&dyn LlmProvider> {
        None
    }

    fn as_tools(&self) -> Option<&dyn ToolProvider> {
        None
    }

    fn as_communicator(&self) -> Option<&dyn Communicator> {
        None
    }

    fn as_wallet(&self) -> Option<&dyn WalletProvider> {
        None
    }

    // ── Extension-point facets ─────────────────────────────────────
    // A plugin listing a point in `meta.implements` must return the
    // matching facet here.

    /// `session.receive` / `session.send` / `session.typing` /
    /// `session.presence`.
    fn as_channel(&self) -> Option<&dyn ChannelAdapter> {
        None
    }

    /// `session.on_receive` / `session.on_send`.
    fn as_session_observer(&self) -> Option<&dyn SessionObserver> {
        None
    }

    /// `lurker.on_observe`.
    fn as_observe_sink(&self) -> Option<&dyn ObserveSink> {
        None
    }
}
