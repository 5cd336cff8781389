//! Telegram channel adapter.
//!
//! Long-polls the Bot API `getUpdates` endpoint with an offset cursor so
//! no update is re-emitted. The transport timeout stays 5 seconds above
//! the protocol timeout. Media is downloaded into a per-day directory
//! before the message is emitted; unknown chats are auto-registered with
//! a placeholder name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use cb_domain::config::Config;
use cb_domain::message::{IncomingMessage, MediaAttachment, OutgoingMessage};
use cb_domain::{Error, Result};
use cb_kernel::{ChannelAdapter, Kernel, Plugin, PluginMeta};

/// Extra transport headroom above the long-poll protocol timeout.
const TRANSPORT_MARGIN_SECS: u64 = 5;
const SEND_TIMEOUT_SECS: u64 = 10;
const TYPING_TIMEOUT_SECS: u64 = 5;

static META: PluginMeta = PluginMeta::new("telegram", "0.1.0")
    .with_dependencies(&["config"])
    .with_priority(25)
    .with_implements(&["session.receive", "session.send", "session.typing"]);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bot API wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TgUpdate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    edited_message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgMessage {
    message_id: i64,
    #[serde(default)]
    date: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
    photo: Option<Vec<TgFile>>,
    document: Option<TgFile>,
    voice: Option<TgFile>,
    video: Option<TgFile>,
    audio: Option<TgFile>,
    sticker: Option<TgFile>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_id: String,
    file_name: Option<String>,
    file_size: Option<u64>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    ok: bool,
    result: Option<FilePath>,
}

#[derive(Debug, Deserialize)]
struct FilePath {
    file_path: Option<String>,
}

/// A media item spotted in an update, pending download.
#[derive(Debug)]
pub(crate) struct MediaRef {
    kind: &'static str,
    file_id: String,
    ext: String,
    file_size: Option<u64>,
    mime_type: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct GroupEntry {
    name: String,
    enabled: bool,
}

#[derive(Default)]
struct TelegramState {
    token: String,
    api_base: String,
    poll_timeout: u64,
    media_dir: PathBuf,
    groups: HashMap<i64, GroupEntry>,
    /// getUpdates cursor: next update id to fetch.
    offset: Option<i64>,
    poll_client: Option<reqwest::Client>,
    send_client: Option<reqwest::Client>,
}

/// Telegram bot channel plugin.
pub struct TelegramPlugin {
    state: RwLock<TelegramState>,
}

impl TelegramPlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TelegramState::default()),
        }
    }

    /// Apply a batch of updates: advance the cursor, auto-register unknown
    /// chats, drop disabled groups, and normalize the rest.
    pub(crate) fn ingest_updates(
        &self,
        updates: Vec<TgUpdate>,
    ) -> Vec<(IncomingMessage, Option<MediaRef>)> {
        let mut out = Vec::new();
        let mut max_update: Option<i64> = None;

        let mut state = self.state.write();
        for update in updates {
            max_update = Some(
                max_update.map_or(update.update_id, |m: i64| m.max(update.update_id)),
            );

            let Some(msg) = update.edited_message.or(update.message) else {
                continue;
            };

            let chat_id = msg.chat.id;
            let entry = state.groups.entry(chat_id).or_insert_with(|| GroupEntry {
                name: msg
                    .chat
                    .title
                    .clone()
                    .unwrap_or_else(|| chat_id.to_string()),
                enabled: true,
            });
            if !entry.enabled {
                continue;
            }
            let group_name = entry.name.clone();

            let media = media_ref(&msg);
            out.push((normalize_message(&msg, &group_name), media));
        }

        if let Some(max_update) = max_update {
            state.offset = Some(max_update + 1);
        }
        out
    }

    async fn download_media(
        &self,
        client: &reqwest::Client,
        api_base: &str,
        token: &str,
        media_dir: &PathBuf,
        message_id: &str,
        media: MediaRef,
    ) -> Option<MediaAttachment> {
        let get_file_url = format!("{api_base}/bot{token}/getFile");
        let response = client
            .post(&get_file_url)
            .json(&json!({"file_id": media.file_id}))
            .send()
            .await
            .ok()?;
        let body: GetFileResponse = response.json().await.ok()?;
        let file_path = body.result.and_then(|r| r.file_path)?;
        if !body.ok {
            return None;
        }

        let bytes = client
            .get(format!("{api_base}/file/bot{token}/{file_path}"))
            .send()
            .await
            .ok()?
            .bytes()
            .await
            .ok()?;

        let day_dir = media_dir.join(Utc::now().format("%Y-%m-%d").to_string());
        if let Err(e) = std::fs::create_dir_all(&day_dir) {
            tracing::warn!(error = %e, "cannot create media directory");
            return None;
        }
        let local_path = day_dir.join(format!("{}_{message_id}{}", media.kind, media.ext));
        if let Err(e) = std::fs::write(&local_path, &bytes) {
            tracing::warn!(error = %e, path = %local_path.display(), "media write failed");
            return None;
        }

        tracing::debug!(kind = media.kind, path = %local_path.display(), "media downloaded");
        Some(MediaAttachment {
            kind: media.kind.to_owned(),
            local_path: local_path.to_string_lossy().into_owned(),
            file_size: media.file_size,
            mime_type: media.mime_type,
        })
    }
}

impl Default for TelegramPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TelegramPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut state = self.state.write();
        state.token = if config.telegram.bot_token.is_empty() {
            std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default()
        } else {
            config.telegram.bot_token.clone()
        };
        state.api_base = config.telegram.api_base.trim_end_matches('/').to_owned();
        state.poll_timeout = config.telegram.poll_timeout;
        state.media_dir = config.telegram.media_dir.clone();
        state.groups = config
            .telegram
            .groups
            .iter()
            .map(|g| {
                (
                    g.id,
                    GroupEntry {
                        name: if g.name.is_empty() {
                            g.id.to_string()
                        } else {
                            g.name.clone()
                        },
                        enabled: g.enabled,
                    },
                )
            })
            .collect();
        Ok(())
    }

    async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
        let (token, poll_timeout, media_dir, group_count) = {
            let state = self.state.read();
            (
                state.token.clone(),
                state.poll_timeout,
                state.media_dir.clone(),
                state.groups.len(),
            )
        };

        if token.is_empty() {
            tracing::warn!("telegram disabled: no bot token configured");
            return Ok(());
        }

        std::fs::create_dir_all(&media_dir)?;

        let poll_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                poll_timeout + TRANSPORT_MARGIN_SECS,
            ))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let send_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut state = self.state.write();
        state.poll_client = Some(poll_client);
        state.send_client = Some(send_client);

        tracing::info!(groups = group_count, poll_timeout, "telegram channel ready");
        Ok(())
    }

    fn as_channel(&self) -> Option<&dyn ChannelAdapter> {
        Some(self)
    }
}

#[async_trait]
impl ChannelAdapter for TelegramPlugin {
    async fn receive(&self) -> Result<Vec<IncomingMessage>> {
        let (token, api_base, poll_timeout, offset, media_dir, client) = {
            let state = self.state.read();
            if state.token.is_empty() {
                return Ok(Vec::new());
            }
            let Some(client) = state.poll_client.clone() else {
                return Ok(Vec::new());
            };
            (
                state.token.clone(),
                state.api_base.clone(),
                state.poll_timeout,
                state.offset,
                state.media_dir.clone(),
                client,
            )
        };

        let mut query = json!({ "timeout": poll_timeout });
        if let Some(offset) = offset {
            query["offset"] = json!(offset);
        }

        let response = client
            .post(format!("{api_base}/bot{token}/getUpdates"))
            .json(&query)
            .send()
            .await
            .map_err(|e| Error::Communication(format!("telegram getUpdates: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "telegram getUpdates: HTTP {}",
                response.status()
            )));
        }
        let body: UpdatesResponse = response
            .json()
            .await
            .map_err(|e| Error::Communication(format!("telegram getUpdates body: {e}")))?;
        if !body.ok {
            return Err(Error::Communication(
                "telegram getUpdates returned ok=false".into(),
            ));
        }

        let normalized = self.ingest_updates(body.result);

        let mut messages = Vec::with_capacity(normalized.len());
        for (mut msg, media) in normalized {
            if let Some(media) = media {
                if let Some(attachment) = self
                    .download_media(&client, &api_base, &token, &media_dir, &msg.id, media)
                    .await
                {
                    msg.media.push(attachment);
                }
            }
            messages.push(msg);
        }
        Ok(messages)
    }

    async fn send(&self, msg: &OutgoingMessage) -> Result<bool> {
        let (token, api_base, client) = {
            let state = self.state.read();
            if state.token.is_empty() {
                return Ok(false);
            }
            let Some(client) = state.send_client.clone() else {
                return Ok(false);
            };
            (state.token.clone(), state.api_base.clone(), client)
        };

        let chat_id: i64 = msg
            .channel_id
            .parse()
            .map_err(|_| Error::Communication(format!("bad telegram chat id: {}", msg.channel_id)))?;

        let mut body = json!({
            "chat_id": chat_id,
            "text": msg.content,
        });
        if let Some(reply_to) = msg.reply_to.as_ref().and_then(|r| r.parse::<i64>().ok()) {
            body["reply_parameters"] = json!({ "message_id": reply_to });
        }

        let response = client
            .post(format!("{api_base}/bot{token}/sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Communication(format!("telegram sendMessage: {e}")))?;

        Ok(response.status().is_success())
    }

    async fn typing(&self, channel_id: &str) -> Result<()> {
        let (token, api_base, client) = {
            let state = self.state.read();
            if state.token.is_empty() {
                return Ok(());
            }
            let Some(client) = state.send_client.clone() else {
                return Ok(());
            };
            (state.token.clone(), state.api_base.clone(), client)
        };

        let chat_id: i64 = channel_id
            .parse()
            .map_err(|_| Error::Communication(format!("bad telegram chat id: {channel_id}")))?;

        client
            .post(format!("{api_base}/bot{token}/sendChatAction"))
            .timeout(std::time::Duration::from_secs(TYPING_TIMEOUT_SECS))
            .json(&json!({"chat_id": chat_id, "action": "typing"}))
            .send()
            .await
            .map_err(|e| Error::Communication(format!("telegram sendChatAction: {e}")))?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn sender_name(user: &Option<TgUser>) -> String {
    let Some(user) = user else {
        return "unknown".into();
    };
    if let Some(username) = user.username.as_ref().filter(|u| !u.is_empty()) {
        return username.clone();
    }
    let full = match (&user.first_name, &user.last_name) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        (Some(first), None) => first.clone(),
        _ => String::new(),
    };
    if full.is_empty() {
        user.id.to_string()
    } else {
        full
    }
}

fn normalize_message(msg: &TgMessage, group_name: &str) -> IncomingMessage {
    let timestamp = DateTime::<Utc>::from_timestamp(msg.date, 0).unwrap_or_else(Utc::now);

    let mut metadata = HashMap::new();
    metadata.insert("group_name".to_owned(), json!(group_name));

    IncomingMessage {
        id: msg.message_id.to_string(),
        channel_type: "telegram".into(),
        channel_id: msg.chat.id.to_string(),
        sender_id: msg
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default(),
        sender_name: sender_name(&msg.from),
        content: msg
            .text
            .clone()
            .or_else(|| msg.caption.clone())
            .unwrap_or_default(),
        timestamp,
        reply_to: msg
            .reply_to_message
            .as_ref()
            .map(|r| r.message_id.to_string()),
        media: Vec::new(),
        metadata,
    }
}

/// Pick the richest media item on a message and the extension its download
/// should carry.
fn media_ref(msg: &TgMessage) -> Option<MediaRef> {
    fn name_ext(file: &TgFile, fallback: &str) -> String {
        file.file_name
            .as_ref()
            .and_then(|n| n.rfind('.').map(|i| n[i..].to_owned()))
            .unwrap_or_else(|| fallback.to_owned())
    }

    if let Some(photos) = msg.photo.as_ref().filter(|p| !p.is_empty()) {
        // Largest size comes last.
        let photo = photos.last()?;
        return Some(MediaRef {
            kind: "photo",
            file_id: photo.file_id.clone(),
            ext: ".jpg".into(),
            file_size: photo.file_size,
            mime_type: photo.mime_type.clone(),
        });
    }
    if let Some(document) = &msg.document {
        return Some(MediaRef {
            kind: "document",
            file_id: document.file_id.clone(),
            ext: name_ext(document, ""),
            file_size: document.file_size,
            mime_type: document.mime_type.clone(),
        });
    }
    if let Some(voice) = &msg.voice {
        return Some(MediaRef {
            kind: "voice",
            file_id: voice.file_id.clone(),
            ext: ".ogg".into(),
            file_size: voice.file_size,
            mime_type: voice.mime_type.clone(),
        });
    }
    if let Some(video) = &msg.video {
        return Some(MediaRef {
            kind: "video",
            file_id: video.file_id.clone(),
            ext: ".mp4".into(),
            file_size: video.file_size,
            mime_type: video.mime_type.clone(),
        });
    }
    if let Some(audio) = &msg.audio {
        return Some(MediaRef {
            kind: "audio",
            file_id: audio.file_id.clone(),
            ext: name_ext(audio, ".mp3"),
            file_size: audio.file_size,
            mime_type: audio.mime_type.clone(),
        });
    }
    if let Some(sticker) = &msg.sticker {
        return Some(MediaRef {
            kind: "sticker",
            file_id: sticker.file_id.clone(),
            ext: ".webp".into(),
            file_size: sticker.file_size,
            mime_type: sticker.mime_type.clone(),
        });
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::config::{TelegramConfig, TelegramGroup};

    fn updates(raw: &str) -> Vec<TgUpdate> {
        serde_json::from_str(raw).unwrap()
    }

    fn configured_plugin(groups: Vec<TelegramGroup>) -> TelegramPlugin {
        let plugin = TelegramPlugin::new();
        let mut config = Config::default();
        config.telegram = TelegramConfig {
            bot_token: "test-token".into(),
            groups,
            ..TelegramConfig::default()
        };
        plugin.configure(&config).unwrap();
        plugin
    }

    const TEXT_UPDATE: &str = r#"[{
        "update_id": 100,
        "message": {
            "message_id": 42,
            "date": 1700000000,
            "chat": {"id": -100, "title": "dev-chat", "type": "supergroup"},
            "from": {"id": 7, "username": "alice", "first_name": "Alice"},
            "text": "hi"
        }
    }]"#;

    #[test]
    fn normalizes_a_text_update() {
        let plugin = configured_plugin(vec![TelegramGroup {
            id: -100,
            name: "dev-chat".into(),
            enabled: true,
        }]);

        let out = plugin.ingest_updates(updates(TEXT_UPDATE));
        assert_eq!(out.len(), 1);
        let (msg, media) = &out[0];
        assert!(media.is_none());
        assert_eq!(msg.id, "42");
        assert_eq!(msg.channel_type, "telegram");
        assert_eq!(msg.channel_id, "-100");
        assert_eq!(msg.sender_id, "7");
        assert_eq!(msg.sender_name, "alice");
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn cursor_advances_past_the_highest_update() {
        let plugin = configured_plugin(vec![]);
        plugin.ingest_updates(updates(TEXT_UPDATE));
        assert_eq!(plugin.state.read().offset, Some(101));

        // Re-feeding the same update id does not move the cursor backwards
        // in a real poll because getUpdates is called with offset 101.
        let out = plugin.ingest_updates(updates(TEXT_UPDATE));
        assert_eq!(plugin.state.read().offset, Some(101));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn unknown_chats_are_auto_registered() {
        let plugin = configured_plugin(vec![]);
        let out = plugin.ingest_updates(updates(TEXT_UPDATE));
        assert_eq!(out.len(), 1);
        let state = plugin.state.read();
        assert_eq!(state.groups.get(&-100).map(|g| g.name.as_str()), Some("dev-chat"));
    }

    #[test]
    fn disabled_groups_are_dropped() {
        let plugin = configured_plugin(vec![TelegramGroup {
            id: -100,
            name: "muted".into(),
            enabled: false,
        }]);
        let out = plugin.ingest_updates(updates(TEXT_UPDATE));
        assert!(out.is_empty());
        // Cursor still advances so the update is not re-fetched.
        assert_eq!(plugin.state.read().offset, Some(101));
    }

    #[test]
    fn caption_and_photo_produce_media_ref() {
        let raw = r#"[{
            "update_id": 7,
            "message": {
                "message_id": 9,
                "date": 1700000100,
                "chat": {"id": -100, "title": "dev-chat"},
                "from": {"id": 7, "first_name": "Alice", "last_name": "Ames"},
                "caption": "look",
                "photo": [
                    {"file_id": "small", "file_size": 100},
                    {"file_id": "big", "file_size": 900}
                ]
            }
        }]"#;
        let plugin = configured_plugin(vec![]);
        let out = plugin.ingest_updates(updates(raw));
        let (msg, media) = &out[0];
        assert_eq!(msg.content, "look");
        assert_eq!(msg.sender_name, "Alice Ames");
        let media = media.as_ref().unwrap();
        assert_eq!(media.kind, "photo");
        assert_eq!(media.file_id, "big");
        assert_eq!(media.ext, ".jpg");
    }

    #[test]
    fn reply_to_is_preserved() {
        let raw = r#"[{
            "update_id": 8,
            "message": {
                "message_id": 10,
                "date": 1700000200,
                "chat": {"id": -100},
                "from": {"id": 7},
                "text": "re",
                "reply_to_message": {
                    "message_id": 3,
                    "date": 1700000000,
                    "chat": {"id": -100}
                }
            }
        }]"#;
        let plugin = configured_plugin(vec![]);
        let out = plugin.ingest_updates(updates(raw));
        assert_eq!(out[0].0.reply_to.as_deref(), Some("3"));
        assert_eq!(out[0].0.sender_name, "7");
    }
}
