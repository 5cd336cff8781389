//! The session orchestrator.
//!
//! Implements the `communication.*` surface on top of the `session.*`
//! extension points. Polling is serial per adapter (each adapter's cursor
//! is touched by exactly one call per cycle); results are merged and
//! sorted by timestamp. Observers fire on receive (before the agent sees
//! the message) and after a successful send.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use cb_domain::message::{IncomingMessage, OutgoingMessage};
use cb_domain::Result;
use cb_kernel::{
    Capability, ChannelAdapter, Communicator, Kernel, Plugin, PluginMeta, SessionObserver,
};

static META: PluginMeta = PluginMeta::new("session", "1.0.0")
    .with_capabilities(&[Capability::Communication])
    .with_dependencies(&["config"])
    .with_priority(12)
    .with_implements(&[
        "communication.receive",
        "communication.send",
        "communication.typing",
        "communication.channels",
    ])
    .with_extension_points(&[
        "session.receive",
        "session.send",
        "session.typing",
        "session.presence",
        "session.on_receive",
        "session.on_send",
    ]);

/// Session orchestrator plugin.
pub struct SessionPlugin {
    kernel: RwLock<Weak<Kernel>>,
}

impl SessionPlugin {
    pub fn new() -> Self {
        Self {
            kernel: RwLock::new(Weak::new()),
        }
    }

    fn kernel(&self) -> Option<Arc<Kernel>> {
        self.kernel.read().upgrade()
    }

    /// Adapters implementing `point`, in load order, with their facet.
    fn adapters(&self, point: &str) -> Vec<(String, Arc<dyn Plugin>)> {
        self.kernel()
            .map(|k| k.get_implementations(point))
            .unwrap_or_default()
    }

    async fn notify_receive(&self, msg: &IncomingMessage) {
        for (id, plugin) in self.adapters("session.on_receive") {
            if let Some(observer) = plugin.as_session_observer() {
                observer.on_receive(msg).await;
            } else {
                tracing::warn!(plugin = %id, "implements session.on_receive without observer facet");
            }
        }
    }

    async fn notify_send(&self, msg: &OutgoingMessage) {
        for (id, plugin) in self.adapters("session.on_send") {
            if let Some(observer) = plugin.as_session_observer() {
                observer.on_send(msg).await;
            } else {
                tracing::warn!(plugin = %id, "implements session.on_send without observer facet");
            }
        }
    }
}

impl Default for SessionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for SessionPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        *self.kernel.write() = Arc::downgrade(kernel);

        let channels = self.channels();
        if channels.is_empty() {
            tracing::warn!("no channels registered");
        } else {
            tracing::info!(channels = ?channels, "session orchestrator ready");
        }
        Ok(())
    }

    fn as_communicator(&self) -> Option<&dyn Communicator> {
        Some(self)
    }
}

#[async_trait]
impl Communicator for SessionPlugin {
    async fn poll(&self) -> Vec<IncomingMessage> {
        let mut messages: Vec<IncomingMessage> = Vec::new();

        for (plugin_id, plugin) in self.adapters("session.receive") {
            let Some(adapter) = plugin.as_channel() else {
                tracing::warn!(plugin = %plugin_id, "implements session.receive without channel facet");
                continue;
            };

            match adapter.receive().await {
                Ok(channel_messages) => {
                    for mut msg in channel_messages {
                        if msg.channel_type.is_empty() {
                            msg.channel_type = plugin_id.clone();
                        }
                        messages.push(msg);
                    }
                }
                Err(e) => {
                    tracing::warn!(plugin = %plugin_id, error = %e, "channel poll failed");
                }
            }
        }

        for msg in &messages {
            self.notify_receive(msg).await;
        }

        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    async fn send(&self, msg: OutgoingMessage) -> bool {
        for (plugin_id, plugin) in self.adapters("session.send") {
            if plugin_id != msg.channel_type {
                continue;
            }
            let Some(adapter) = plugin.as_channel() else {
                continue;
            };

            return match adapter.send(&msg).await {
                Ok(true) => {
                    self.notify_send(&msg).await;
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    tracing::warn!(plugin = %plugin_id, error = %e, "channel send failed");
                    false
                }
            };
        }

        tracing::warn!(channel_type = %msg.channel_type, "no channel for outgoing message");
        false
    }

    async fn typing(&self, channel_type: &str, channel_id: &str) {
        for (plugin_id, plugin) in self.adapters("session.typing") {
            if plugin_id != channel_type {
                continue;
            }
            if let Some(adapter) = plugin.as_channel() {
                if let Err(e) = adapter.typing(channel_id).await {
                    tracing::debug!(plugin = %plugin_id, error = %e, "typing indicator failed");
                }
            }
            return;
        }
    }

    fn channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .adapters("session.receive")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.dedup();
        ids
    }
}
