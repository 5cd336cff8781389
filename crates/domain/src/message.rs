//! The channel message envelope.
//!
//! Channel adapters normalize their wire protocol into [`IncomingMessage`];
//! the orchestrator answers with [`OutgoingMessage`]. Message `id`s are
//! unique within `(channel_type, channel_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A media attachment already downloaded to local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Media kind: "photo", "document", "voice", "video", …
    pub kind: String,
    /// Local filesystem path of the downloaded file.
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Normalized message from any channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Unique message id within `(channel_type, channel_id)`.
    pub id: String,
    /// Channel plugin id ("telegram", "filedrop", …). Backfilled by the
    /// session aggregator when an adapter leaves it empty.
    pub channel_type: String,
    /// Group/room/chat id within the channel.
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IncomingMessage {
    /// The local at-most-once key: `channel_type ":" channel_id ":" id`.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.channel_type, self.channel_id, self.id)
    }
}

/// Message to send to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target channel plugin id.
    pub channel_type: String,
    /// Target group/room/chat id.
    pub channel_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutgoingMessage {
    pub fn new(
        channel_type: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_type: channel_type.into(),
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

/// One observed message, as handed to lurker sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub ts: DateTime<Utc>,
    /// "in" for received messages, "out" for sent ones.
    pub direction: Direction,
    pub channel: String,
    pub channel_name: String,
    pub sender_id: String,
    pub sender: String,
    pub text: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_format() {
        let msg = IncomingMessage {
            id: "42".into(),
            channel_type: "telegram".into(),
            channel_id: "-100".into(),
            sender_id: "7".into(),
            sender_name: "alice".into(),
            content: "hi".into(),
            timestamp: Utc::now(),
            reply_to: None,
            media: vec![],
            metadata: HashMap::new(),
        };
        assert_eq!(msg.dedup_key(), "telegram:-100:42");
    }
}
