//! ChatWork adapter: webhook payload parsing and message sending.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use soulkun_shared::{BrainError, ChannelKind, InboundMessage};

use crate::config::ChatworkConfig;

use super::ChannelAdapter;

const CHATWORK_API: &str = "https://api.chatwork.com/v2";

/// ChatWork webhook envelope.
#[derive(Debug, Deserialize)]
pub struct ChatworkWebhook {
    pub webhook_event: ChatworkEvent,
}

#[derive(Debug, Deserialize)]
pub struct ChatworkEvent {
    pub room_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub send_time: i64,
    #[serde(default)]
    pub from_account_name: Option<String>,
}

impl ChatworkWebhook {
    /// Normalize into the transport-agnostic envelope.
    pub fn into_message(self) -> InboundMessage {
        let event = self.webhook_event;
        let sender_id = event.account_id.to_string();
        InboundMessage {
            id: Uuid::new_v4(),
            channel: ChannelKind::Chatwork,
            room_id: event.room_id.to_string(),
            sender_name: event
                .from_account_name
                .clone()
                .unwrap_or_else(|| sender_id.clone()),
            sender_id,
            body: strip_chatwork_tags(&event.body),
            received_at: Utc
                .timestamp_opt(event.send_time, 0)
                .single()
                .unwrap_or_else(Utc::now),
            metadata: serde_json::json!({ "send_time": event.send_time }),
        }
    }
}

/// Remove [To:…]/[rp …] style tags ChatWork prepends to mentions.
fn strip_chatwork_tags(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut depth = 0usize;
    for ch in body.chars() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

pub struct ChatworkChannel {
    client: reqwest::Client,
    config: ChatworkConfig,
}

impl ChatworkChannel {
    pub fn new(config: ChatworkConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChannelAdapter for ChatworkChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Chatwork
    }

    async fn send(&self, room_id: &str, text: &str) -> Result<bool, BrainError> {
        let response = self
            .client
            .post(format!("{}/rooms/{}/messages", CHATWORK_API, room_id))
            .header("X-ChatWorkToken", &self.config.api_token)
            .form(&[("body", text)])
            .send()
            .await
            .map_err(|e| BrainError::Channel(format!("chatwork send: {e}")))?;

        if !response.status().is_success() {
            warn!(room = room_id, status = %response.status(), "chatwork rejected message");
            return Ok(false);
        }
        Ok(true)
    }

    fn allows_room(&self, room_id: &str) -> bool {
        self.config.allowed_rooms.is_empty()
            || self.config.allowed_rooms.iter().any(|r| r == room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_parse_and_normalize() {
        let raw = r#"{
            "webhook_event": {
                "room_id": 123456,
                "account_id": 42,
                "body": "[To:99] ソウルくん\n今日のタスク教えて",
                "send_time": 1722900000
            }
        }"#;
        let webhook: ChatworkWebhook = serde_json::from_str(raw).unwrap();
        let message = webhook.into_message();
        assert_eq!(message.channel, ChannelKind::Chatwork);
        assert_eq!(message.room_id, "123456");
        assert_eq!(message.sender_id, "42");
        assert_eq!(message.body, "ソウルくん\n今日のタスク教えて");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_chatwork_tags("[To:1]おはよう"), "おはよう");
        assert_eq!(strip_chatwork_tags("タグなし"), "タグなし");
        assert_eq!(
            strip_chatwork_tags("[rp aid=5 to=1-2]返信です"),
            "返信です"
        );
    }

    #[test]
    fn test_room_allowlist() {
        let channel = ChatworkChannel::new(ChatworkConfig {
            api_token: "t".to_string(),
            allowed_rooms: vec!["123".to_string()],
        });
        assert!(channel.allows_room("123"));
        assert!(!channel.allows_room("999"));

        let open = ChatworkChannel::new(ChatworkConfig::default());
        assert!(open.allows_room("anything"));
    }
}
