//! Telegram adapter: update parsing and message sending via the Bot API.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use soulkun_shared::{BrainError, ChannelKind, InboundMessage};

use crate::config::TelegramConfig;

use super::ChannelAdapter;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram webhook update (the subset we consume).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

impl TelegramUpdate {
    /// Normalize into the transport-agnostic envelope. Updates without a
    /// text message (stickers, joins) yield `None`.
    pub fn into_message(self) -> Option<InboundMessage> {
        let message = self.message?;
        let text = message.text?;
        if text.trim().is_empty() {
            return None;
        }
        let from = message.from?;
        Some(InboundMessage {
            id: Uuid::new_v4(),
            channel: ChannelKind::Telegram,
            room_id: message.chat.id.to_string(),
            sender_id: from.id.to_string(),
            sender_name: if from.first_name.is_empty() {
                from.id.to_string()
            } else {
                from.first_name
            },
            body: text,
            received_at: Utc
                .timestamp_opt(message.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
            metadata: serde_json::json!({ "update_id": self.update_id }),
        })
    }
}

pub struct TelegramChannel {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, room_id: &str, text: &str) -> Result<bool, BrainError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            TELEGRAM_API, self.config.bot_token
        );
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "chat_id": room_id, "text": text }))
            .send()
            .await
            .map_err(|e| BrainError::Channel(format!("telegram send: {e}")))?;

        if !response.status().is_success() {
            warn!(chat = room_id, status = %response.status(), "telegram rejected message");
            return Ok(false);
        }
        Ok(true)
    }

    fn allows_room(&self, room_id: &str) -> bool {
        self.config.allowed_chats.is_empty()
            || self.config.allowed_chats.iter().any(|c| c == room_id)
    }
}
