//! Static plugin registration.
//!
//! Every plugin is a value built here at startup — there is no runtime
//! discovery. Selection rules: `plugins.disabled` entries are never
//! registered; `llm`-capability plugins only when their id matches the
//! configured `provider`; a non-empty `plugins.enabled` restricts
//! registration to the listed plugins plus the core set (`config`,
//! `logger`, the provider).

use std::sync::Arc;

use cb_channels::{FiledropPlugin, SessionPlugin, TelegramPlugin};
use cb_domain::config::Config;
use cb_domain::Result;
use cb_kernel::{Capability, Kernel, Plugin};
use cb_pairing::PairingPlugin;
use cb_providers::{OllamaPlugin, PpqPlugin};
use cb_tools::ToolsPlugin;

use crate::plugins::{
    CompactionPlugin, ConfigPlugin, ContextPlugin, LoggerPlugin, LurkerPlugin, SecurityPlugin,
};

/// The full built-in plugin set, instantiated fresh.
fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(ConfigPlugin::new()),
        Arc::new(LoggerPlugin::new()),
        Arc::new(PairingPlugin::new()),
        Arc::new(LurkerPlugin::new()),
        Arc::new(SecurityPlugin::new()),
        Arc::new(SessionPlugin::new()),
        Arc::new(CompactionPlugin::new()),
        Arc::new(ContextPlugin::new()),
        Arc::new(PpqPlugin::new()),
        Arc::new(OllamaPlugin::new()),
        Arc::new(FiledropPlugin::new()),
        Arc::new(TelegramPlugin::new()),
        Arc::new(ToolsPlugin::new()),
    ]
}

/// Decide whether a plugin participates in this run.
fn selected(plugin: &Arc<dyn Plugin>, config: &Config) -> bool {
    let meta = plugin.meta();
    let id = meta.id;

    if config.plugins.disabled.iter().any(|d| d == id) {
        tracing::info!(plugin = id, "skipping disabled plugin");
        return false;
    }

    // LLM providers: only the configured one.
    if meta.has_capability(Capability::Llm) && id != config.provider {
        tracing::debug!(plugin = id, provider = %config.provider, "skipping unselected provider");
        return false;
    }

    if !config.plugins.enabled.is_empty() {
        let is_core = id == "config" || id == "logger" || id == config.provider;
        if !is_core && !config.plugins.enabled.iter().any(|e| e == id) {
            tracing::info!(plugin = id, "skipping non-enabled plugin");
            return false;
        }
    }

    true
}

/// Build, register and configure the full kernel. `start_all` is left to
/// the caller so it can own shutdown ordering.
pub fn build_kernel(config: &Config) -> Result<Arc<Kernel>> {
    let kernel = Arc::new(Kernel::new());

    for plugin in builtin_plugins() {
        if selected(&plugin, config) {
            kernel.register(plugin)?;
        }
    }

    kernel.configure_all(config)?;
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(provider: &str) -> Config {
        let mut config = Config::default();
        config.provider = provider.into();
        // Keep validation quiet and avoid touching the real home dir.
        config.pairing.enabled = false;
        config
    }

    #[test]
    fn only_the_configured_provider_registers() {
        let kernel = build_kernel(&config_with("ollama")).unwrap();
        assert!(kernel.get("ollama").is_some());
        assert!(kernel.get("ppq").is_none());
    }

    #[test]
    fn disabled_plugins_are_skipped() {
        let mut config = config_with("ollama");
        config.plugins.disabled = vec!["telegram".into(), "lurker".into()];
        let kernel = build_kernel(&config).unwrap();
        assert!(kernel.get("telegram").is_none());
        assert!(kernel.get("lurker").is_none());
        assert!(kernel.get("session").is_some());
    }

    #[test]
    fn enabled_list_keeps_core_plugins() {
        let mut config = config_with("ollama");
        config.plugins.enabled = vec!["session".into(), "tools".into()];
        let kernel = build_kernel(&config).unwrap();

        // Listed plus core.
        assert!(kernel.get("session").is_some());
        assert!(kernel.get("tools").is_some());
        assert!(kernel.get("config").is_some());
        assert!(kernel.get("logger").is_some());
        assert!(kernel.get("ollama").is_some());

        // Everything else is out.
        assert!(kernel.get("telegram").is_none());
        assert!(kernel.get("pairing").is_none());
        assert!(kernel.get("compaction").is_none());
    }
}
