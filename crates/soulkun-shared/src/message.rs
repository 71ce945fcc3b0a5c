//! Transport-agnostic message envelopes.
//!
//! Channel adapters (ChatWork, Telegram) normalize their webhook payloads
//! into [`InboundMessage`] before the pipeline sees them; the pipeline never
//! branches on the originating channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which chat transport a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Chatwork,
    Telegram,
    /// Local RPC (soulkunctl / tests).
    Local,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chatwork => "chatwork",
            Self::Telegram => "telegram",
            Self::Local => "local",
        };
        write!(f, "{}", s)
    }
}

/// A normalized inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique id for this delivery (idempotency anchor for the request).
    pub id: Uuid,
    pub channel: ChannelKind,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Channel-specific extras (message ids, reply markers).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InboundMessage {
    /// Build a local (ctl/test) message for a room/user pair.
    pub fn local(room_id: &str, sender_id: &str, body: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: ChannelKind::Local,
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_id.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// The reply the pipeline hands back to the channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub room_id: String,
    pub text: String,
}

impl OutboundReply {
    pub fn new(room_id: &str, text: impl Into<String>) -> Self {
        Self {
            room_id: room_id.to_string(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_message() {
        let msg = InboundMessage::local("room-1", "user-9", "おはよう");
        assert_eq!(msg.channel, ChannelKind::Local);
        assert_eq!(msg.body, "おはよう");
        assert_eq!(msg.sender_name, "user-9");
    }

    #[test]
    fn test_channel_kind_display() {
        assert_eq!(ChannelKind::Chatwork.to_string(), "chatwork");
        assert_eq!(ChannelKind::Telegram.to_string(), "telegram");
    }
}
