//! Passive channel observation.
//!
//! Lurker watches a configured set of channels through the session
//! observer points, counts traffic, fans each observation out to
//! `lurker.on_observe` sinks and optionally appends to a built-in JSONL
//! or Markdown sink under a per-day directory. Observation is
//! side-effect only: processing is never aborted.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use cb_domain::config::{Config, SinkKind};
use cb_domain::message::{Direction, IncomingMessage, Observation, OutgoingMessage};
use cb_domain::Result;
use cb_kernel::{Capability, Kernel, ObserveSink, Plugin, PluginMeta, SessionObserver};

static META: PluginMeta = PluginMeta::new("lurker", "0.1.0")
    .with_capabilities(&[Capability::Lurker])
    .with_priority(7)
    .with_extension_points(&["lurker.on_observe"])
    .with_implements(&["session.on_receive", "session.on_send"]);

#[derive(Default)]
struct LurkerState {
    /// channel_id -> display name.
    channels: HashMap<String, String>,
    sink: SinkKind,
    base_dir: PathBuf,
    identity: String,
    counts: HashMap<String, u64>,
}

pub struct LurkerPlugin {
    state: RwLock<LurkerState>,
    kernel: RwLock<Weak<Kernel>>,
}

impl LurkerPlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LurkerState::default()),
            kernel: RwLock::new(Weak::new()),
        }
    }

    fn observation_for(&self, channel_id: &str) -> Option<String> {
        self.state.read().channels.get(channel_id).cloned()
    }

    async fn observe(&self, obs: Observation) {
        let sink = {
            let mut state = self.state.write();
            *state.counts.entry(obs.channel.clone()).or_insert(0) += 1;
            state.sink
        };

        // Fan out to sink plugins first; their failures never block the
        // built-in sink.
        let kernel = self.kernel.read().upgrade();
        if let Some(kernel) = kernel {
            for (plugin_id, plugin) in kernel.get_implementations("lurker.on_observe") {
                match plugin.as_observe_sink() {
                    Some(external) => external.on_observe(&obs).await,
                    None => tracing::warn!(
                        plugin = %plugin_id,
                        "implements lurker.on_observe without sink facet"
                    ),
                }
            }
        }

        if sink != SinkKind::None {
            if let Err(e) = self.write_builtin_sink(sink, &obs) {
                tracing::warn!(error = %e, channel = %obs.channel, "lurker sink write failed");
            }
        }
    }

    fn day_dir(&self) -> PathBuf {
        let base = self.state.read().base_dir.clone();
        base.join(Utc::now().format("%Y-%m-%d").to_string())
    }

    fn write_builtin_sink(&self, sink: SinkKind, obs: &Observation) -> std::io::Result<()> {
        let day_dir = self.day_dir();
        std::fs::create_dir_all(&day_dir)?;

        match sink {
            SinkKind::Jsonl => {
                let path = day_dir.join(format!("{}.jsonl", obs.channel));
                let record = json!({
                    "ts": obs.ts.to_rfc3339(),
                    "direction": obs.direction,
                    "channel": obs.channel,
                    "channel_name": obs.channel_name,
                    "sender_id": obs.sender_id,
                    "sender": obs.sender,
                    "text": obs.text,
                    "event_id": obs.event_id,
                });
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                writeln!(file, "{record}")?;
            }
            SinkKind::Markdown => {
                let path = day_dir.join(format!("{}.md", obs.channel));
                let is_new = !path.exists();
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                if is_new {
                    writeln!(
                        file,
                        "# {} — {}\n",
                        obs.channel_name,
                        Utc::now().format("%Y-%m-%d")
                    )?;
                }
                let ts = obs.ts.format("%Y-%m-%d %H:%M:%S");
                let prefix = match obs.direction {
                    Direction::In => "",
                    Direction::Out => "→ ",
                };
                writeln!(file, "{prefix}**{}** ({ts}):\n{}\n", obs.sender, obs.text)?;
            }
            SinkKind::None => {}
        }
        Ok(())
    }
}

impl Default for LurkerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LurkerPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut state = self.state.write();
        state.channels = config
            .lurker
            .channels
            .iter()
            .map(|ch| {
                let name = if ch.name.is_empty() {
                    ch.id.clone()
                } else {
                    ch.name.clone()
                };
                (ch.id.clone(), name)
            })
            .collect();
        state.sink = config.lurker.sink;
        state.base_dir = config.lurker.base_dir.clone();
        state.identity = config.identity.name.clone();
        Ok(())
    }

    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        *self.kernel.write() = Arc::downgrade(kernel);

        let state = self.state.read();
        if state.channels.is_empty() {
            tracing::info!("lurker: no channels configured");
        } else {
            tracing::info!(
                channels = state.channels.len(),
                sink = ?state.sink,
                base_dir = %state.base_dir.display(),
                "lurker observing"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let state = self.state.read();
        if !state.counts.is_empty() {
            let total: u64 = state.counts.values().sum();
            tracing::info!(total, by_channel = ?state.counts, "lurker observed messages");
        }
        Ok(())
    }

    fn as_session_observer(&self) -> Option<&dyn SessionObserver> {
        Some(self)
    }
}

#[async_trait]
impl SessionObserver for LurkerPlugin {
    async fn on_receive(&self, msg: &IncomingMessage) {
        let Some(channel_name) = self.observation_for(&msg.channel_id) else {
            return;
        };
        self.observe(Observation {
            ts: Utc::now(),
            direction: Direction::In,
            channel: msg.channel_id.clone(),
            channel_name,
            sender_id: msg.sender_id.clone(),
            sender: msg.sender_name.clone(),
            text: msg.content.clone(),
            event_id: msg.id.clone(),
        })
        .await;
    }

    async fn on_send(&self, msg: &OutgoingMessage) {
        let Some(channel_name) = self.observation_for(&msg.channel_id) else {
            return;
        };
        let identity = self.state.read().identity.clone();
        self.observe(Observation {
            ts: Utc::now(),
            direction: Direction::Out,
            channel: msg.channel_id.clone(),
            channel_name,
            sender_id: String::new(),
            sender: identity,
            text: msg.content.clone(),
            event_id: String::new(),
        })
        .await;
    }
}
