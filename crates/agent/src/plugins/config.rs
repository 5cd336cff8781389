//! The config anchor plugin.
//!
//! Configuration itself is loaded by the binary and handed to every
//! plugin through `configure_all`; this plugin exists as the dependency
//! anchor (`dependencies: ["config"]` everywhere) and reports the
//! resolved essentials at startup.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use cb_domain::config::Config;
use cb_domain::Result;
use cb_kernel::{Kernel, Plugin, PluginMeta};

static META: PluginMeta = PluginMeta::new("config", "1.0.0").with_priority(1);

#[derive(Default)]
struct Summary {
    provider: String,
    identity: String,
    soul_path: String,
    external: Vec<String>,
}

pub struct ConfigPlugin {
    summary: RwLock<Summary>,
}

impl ConfigPlugin {
    pub fn new() -> Self {
        Self {
            summary: RwLock::new(Summary::default()),
        }
    }
}

impl Default for ConfigPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ConfigPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut summary = self.summary.write();
        summary.provider = config.provider.clone();
        summary.identity = config.identity.name.clone();
        summary.soul_path = config.paths.soul.display().to_string();
        summary.external = config.plugins.external.clone();
        Ok(())
    }

    async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
        let summary = self.summary.read();
        tracing::info!(
            provider = %summary.provider,
            identity = %summary.identity,
            soul = %summary.soul_path,
            "configuration active"
        );
        if !summary.external.is_empty() {
            tracing::warn!(
                plugins = ?summary.external,
                "plugins.external entries are not loaded at runtime; compile them in"
            );
        }
        Ok(())
    }
}
