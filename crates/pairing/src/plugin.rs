//! The authorization gate.
//!
//! Hooks `on_message_received` at the earliest priority after logging.
//! Unauthorized senders get pairing instructions out-of-band and the
//! message is aborted before any LLM activity.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use cb_domain::config::Config;
use cb_domain::message::OutgoingMessage;
use cb_domain::Result;
use cb_kernel::{
    Capability, Communicator, CtxKey, Hook, HookContext, Kernel, Plugin, PluginMeta,
};

use crate::storage::PairingStore;

static META: PluginMeta = PluginMeta::new("pairing", "1.0.0")
    .with_capabilities(&[Capability::Pairing])
    .with_dependencies(&["config"])
    .with_priority(6);

#[derive(Default)]
struct Settings {
    enabled: bool,
    owner_ids: HashMap<String, Vec<String>>,
    skip_channels: Vec<String>,
    storage_path: PathBuf,
}

/// User authorization via pairing codes.
pub struct PairingPlugin {
    settings: RwLock<Settings>,
    store: RwLock<Option<Arc<PairingStore>>>,
    kernel: RwLock<Weak<Kernel>>,
}

impl PairingPlugin {
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(Settings::default()),
            store: RwLock::new(None),
            kernel: RwLock::new(Weak::new()),
        }
    }

    /// The default store location: `~/.cobot/pairing.yml`.
    pub fn default_storage_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cobot")
            .join("pairing.yml")
    }

    fn store(&self) -> Option<Arc<PairingStore>> {
        self.store.read().clone()
    }

    async fn send_pairing_message(
        &self,
        channel: &str,
        channel_id: &str,
        user_id: &str,
        code: &str,
    ) {
        let content = format!(
            "Access not configured.\n\
             Your {channel} user id: {user_id}\n\
             Pairing code: {code}\n\n\
             Ask the bot owner to approve with:\n  cobot pairing approve {code}"
        );

        let Some(kernel) = self.kernel.read().upgrade() else {
            tracing::warn!("pairing: kernel gone, cannot send instructions");
            return;
        };
        let Some(comm_plugin) = kernel.get_by_capability(Capability::Communication) else {
            tracing::warn!("pairing: no communication capability registered");
            return;
        };
        let Some(comm) = comm_plugin.as_communicator() else {
            return;
        };

        let sent = comm
            .send(OutgoingMessage::new(channel, channel_id, content))
            .await;
        if !sent {
            tracing::warn!(channel, channel_id, "pairing: instruction send failed");
        }
    }
}

impl Default for PairingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PairingPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut settings = self.settings.write();
        settings.enabled = config.pairing.enabled;
        settings.owner_ids = config.pairing.owner_ids.clone();
        settings.skip_channels = config.pairing.skip_channels.clone();
        settings.storage_path = config
            .pairing
            .storage_path
            .clone()
            .unwrap_or_else(Self::default_storage_path);
        Ok(())
    }

    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        *self.kernel.write() = Arc::downgrade(kernel);

        let (enabled, owner_ids, storage_path) = {
            let settings = self.settings.read();
            (
                settings.enabled,
                settings.owner_ids.clone(),
                settings.storage_path.clone(),
            )
        };

        if !enabled {
            tracing::info!("pairing disabled");
            return Ok(());
        }

        let store = Arc::new(PairingStore::new(storage_path));

        // Bootstrap every configured owner as authorized.
        for (channel, user_ids) in &owner_ids {
            for user_id in user_ids {
                store.add_authorized(channel, user_id, &format!("owner:{user_id}"))?;
            }
        }

        tracing::info!(
            authorized = store.authorized().len(),
            pending = store.pending().len(),
            path = %store.path().display(),
            "pairing ready"
        );
        *self.store.write() = Some(store);
        Ok(())
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::MessageReceived]
    }

    async fn on_hook(&self, _hook: Hook, ctx: &mut HookContext) -> Result<()> {
        let Some(store) = self.store() else {
            return Ok(());
        };

        let channel = ctx.get_str(CtxKey::ChannelType).unwrap_or_default().to_owned();
        let user_id = ctx.get_str(CtxKey::SenderId).unwrap_or_default().to_owned();
        let user_name = ctx.get_str(CtxKey::Sender).unwrap_or("unknown").to_owned();
        let channel_id = ctx.get_str(CtxKey::ChannelId).unwrap_or_default().to_owned();

        if channel.is_empty() || user_id.is_empty() {
            return Ok(());
        }

        {
            let settings = self.settings.read();
            if !settings.enabled || settings.skip_channels.contains(&channel) {
                return Ok(());
            }
        }

        if store.is_authorized(&channel, &user_id) {
            return Ok(());
        }

        // Not authorized: ensure a pending request and notify out-of-band.
        let request = store.add_pending(&channel, &user_id, &user_name)?;
        self.send_pairing_message(&channel, &channel_id, &user_id, &request.code)
            .await;

        tracing::info!(
            user = %user_name,
            channel = %channel,
            user_id = %user_id,
            code = %request.code,
            "unauthorized sender, pairing code issued"
        );

        ctx.abort = true;
        Ok(())
    }
}
