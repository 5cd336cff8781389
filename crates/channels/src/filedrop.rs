//! Filedrop channel adapter — file-based messaging.
//!
//! Each participant owns `<base_dir>/<identity>/inbox`; a message is one
//! JSON file dropped into the recipient's inbox. Consumed files move to
//! the owner's `archive` directory, which doubles as the update cursor:
//! a file is never emitted twice, across restarts included.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use cb_domain::config::Config;
use cb_domain::message::{IncomingMessage, OutgoingMessage};
use cb_domain::{Error, Result};
use cb_kernel::{ChannelAdapter, Kernel, Plugin, PluginMeta};

static META: PluginMeta = PluginMeta::new("filedrop", "1.0.0")
    .with_dependencies(&["config"])
    .with_priority(24)
    .with_implements(&["session.receive", "session.send"]);

/// On-disk message format.
#[derive(Debug, Serialize, Deserialize)]
struct DropFile {
    id: String,
    sender: String,
    #[serde(default)]
    sender_name: String,
    content: String,
    #[serde(default)]
    ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
}

#[derive(Default)]
struct FiledropState {
    base_dir: PathBuf,
    identity: String,
    inbox: PathBuf,
    archive: PathBuf,
    started: bool,
}

/// File-based channel plugin.
pub struct FiledropPlugin {
    state: RwLock<FiledropState>,
}

impl FiledropPlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(FiledropState::default()),
        }
    }
}

impl Default for FiledropPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for FiledropPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut state = self.state.write();
        state.base_dir = config.filedrop.base_dir.clone();
        state.identity = if config.filedrop.identity.is_empty() {
            config.identity.name.to_lowercase()
        } else {
            config.filedrop.identity.clone()
        };
        Ok(())
    }

    async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
        let mut state = self.state.write();

        let own_dir = state.base_dir.join(&state.identity);
        state.inbox = own_dir.join("inbox");
        state.archive = own_dir.join("archive");

        std::fs::create_dir_all(&state.inbox)?;
        std::fs::create_dir_all(&state.archive)?;
        std::fs::create_dir_all(state.base_dir.join(&state.identity).join("outbox"))?;

        // World-writable base so peer agents can drop messages.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &state.base_dir,
                std::fs::Permissions::from_mode(0o777),
            );
        }

        state.started = true;
        tracing::info!(inbox = %state.inbox.display(), "filedrop channel ready");
        Ok(())
    }

    fn as_channel(&self) -> Option<&dyn ChannelAdapter> {
        Some(self)
    }
}

#[async_trait]
impl ChannelAdapter for FiledropPlugin {
    async fn receive(&self) -> Result<Vec<IncomingMessage>> {
        let (inbox, archive, started) = {
            let state = self.state.read();
            (state.inbox.clone(), state.archive.clone(), state.started)
        };
        if !started || !inbox.exists() {
            return Ok(Vec::new());
        }

        let mut names: Vec<PathBuf> = std::fs::read_dir(&inbox)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        names.sort();

        let mut messages = Vec::new();
        for path in names {
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable drop file");
                    continue;
                }
            };

            let parsed: DropFile = match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed drop file, archiving");
                    archive_file(&path, &archive);
                    continue;
                }
            };

            let timestamp = DateTime::<Utc>::from_timestamp(parsed.ts, 0)
                .filter(|_| parsed.ts > 0)
                .unwrap_or_else(Utc::now);

            messages.push(IncomingMessage {
                id: parsed.id,
                channel_type: "filedrop".into(),
                // Replies route back to the sender's inbox.
                channel_id: parsed.sender.clone(),
                sender_id: parsed.sender.clone(),
                sender_name: if parsed.sender_name.is_empty() {
                    parsed.sender
                } else {
                    parsed.sender_name
                },
                content: parsed.content,
                timestamp,
                reply_to: parsed.reply_to,
                media: Vec::new(),
                metadata: HashMap::new(),
            });

            archive_file(&path, &archive);
        }

        Ok(messages)
    }

    async fn send(&self, msg: &OutgoingMessage) -> Result<bool> {
        let (base_dir, identity, started) = {
            let state = self.state.read();
            (
                state.base_dir.clone(),
                state.identity.clone(),
                state.started,
            )
        };
        if !started {
            return Ok(false);
        }
        if msg.channel_id.is_empty() || msg.channel_id.contains(['/', '.']) {
            return Err(Error::Communication(format!(
                "bad filedrop recipient: {:?}",
                msg.channel_id
            )));
        }

        let drop = DropFile {
            id: uuid::Uuid::new_v4().to_string(),
            sender: identity.clone(),
            sender_name: identity.clone(),
            content: msg.content.clone(),
            ts: Utc::now().timestamp(),
            reply_to: msg.reply_to.clone(),
        };
        let raw = serde_json::to_string_pretty(&drop)?;

        let recipient_inbox = base_dir.join(&msg.channel_id).join("inbox");
        std::fs::create_dir_all(&recipient_inbox)?;
        let filename = format!("{}.json", drop.id);
        std::fs::write(recipient_inbox.join(&filename), &raw)?;

        // Keep a copy in our outbox for debugging.
        let outbox = base_dir.join(&identity).join("outbox");
        if std::fs::create_dir_all(&outbox).is_ok() {
            let _ = std::fs::write(outbox.join(&filename), &raw);
        }

        Ok(true)
    }
}

/// Move a consumed file into the archive; deletion is the fallback when
/// the rename fails (e.g. cross-device).
fn archive_file(path: &PathBuf, archive: &PathBuf) {
    let Some(name) = path.file_name() else {
        return;
    };
    if std::fs::rename(path, archive.join(name)).is_err() {
        let _ = std::fs::remove_file(path);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    async fn agent(base: &std::path::Path, identity: &str) -> FiledropPlugin {
        let plugin = FiledropPlugin::new();
        let mut config = Config::default();
        config.filedrop.base_dir = base.to_path_buf();
        config.filedrop.identity = identity.into();
        plugin.configure(&config).unwrap();
        let kernel = Arc::new(cb_kernel::Kernel::new());
        plugin.start(&kernel).await.unwrap();
        plugin
    }

    #[tokio::test]
    async fn send_then_receive_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let alice = agent(dir.path(), "alice").await;
        let bob = agent(dir.path(), "bob").await;

        let sent = bob
            .send(&OutgoingMessage::new("filedrop", "alice", "hello alice"))
            .await
            .unwrap();
        assert!(sent);

        let received = alice.receive().await.unwrap();
        assert_eq!(received.len(), 1);
        let msg = &received[0];
        assert_eq!(msg.channel_type, "filedrop");
        assert_eq!(msg.channel_id, "bob");
        assert_eq!(msg.sender_id, "bob");
        assert_eq!(msg.content, "hello alice");

        // Consumed files never come back.
        assert!(alice.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let alice = agent(dir.path(), "alice").await;

        let inbox = dir.path().join("alice").join("inbox");
        std::fs::write(inbox.join("junk.json"), "not json at all").unwrap();

        assert!(alice.receive().await.unwrap().is_empty());
        // And it does not resurface next cycle either.
        assert!(alice.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recipient_path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let alice = agent(dir.path(), "alice").await;
        let err = alice
            .send(&OutgoingMessage::new("filedrop", "../etc", "x"))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn unstarted_plugin_receives_nothing() {
        let plugin = FiledropPlugin::new();
        assert!(plugin.receive().await.unwrap().is_empty());
    }
}
