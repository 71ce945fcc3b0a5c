//! Channel adapters.
//!
//! Each adapter normalizes its webhook payload into the transport-agnostic
//! [`soulkun_shared::InboundMessage`] and sends replies back over its own
//! API. Coarse room allowlists live here — the pipeline itself never
//! branches on the originating channel.

pub mod chatwork;
pub mod telegram;

pub use chatwork::ChatworkChannel;
pub use telegram::TelegramChannel;

use async_trait::async_trait;

use soulkun_shared::{BrainError, ChannelKind};

/// Outbound side of a chat transport.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver one message. Returns whether the transport accepted it.
    async fn send(&self, room_id: &str, text: &str) -> Result<bool, BrainError>;

    /// Coarse permission check: is the bot allowed to answer in this room?
    /// An empty allowlist allows every room.
    fn allows_room(&self, room_id: &str) -> bool;
}
