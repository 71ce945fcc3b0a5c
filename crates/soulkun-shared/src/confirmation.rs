//! Pending confirmations and multi-turn sessions.
//!
//! At most one of each exists per (room, user) scope, and while either is
//! active the general intent path is bypassed: the next inbound message is
//! routed to the continuation handler instead.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Scope;
use crate::tools::ToolCall;
use crate::verdict::ReasonCode;

/// A time-boxed record awaiting the user's yes/no before an action runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: Uuid,
    pub scope: Scope,
    pub action: ToolCall,
    /// Remaining plan steps when a compound request awaits confirmation;
    /// executed after `action` once approved.
    #[serde(default)]
    pub followups: Vec<ToolCall>,
    pub reason: ReasonCode,
    /// The prompt that was shown when confirmation was requested.
    pub prompt: String,
    /// Hash of the message that triggered the confirmation.
    pub message_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn new(
        scope: Scope,
        action: ToolCall,
        reason: ReasonCode,
        prompt: &str,
        message_hash: &str,
        ttl_secs: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope,
            action,
            followups: Vec::new(),
            reason,
            prompt: prompt.to_string(),
            message_hash: message_hash.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    pub fn with_followups(mut self, followups: Vec<ToolCall>) -> Self {
        self.followups = followups;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// How the user answered a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Approve,
    Deny,
    /// Neither a yes nor a no; the confirmation stays pending and the user
    /// is re-prompted.
    Unclear,
}

impl ConfirmationReply {
    /// Parse a free-form reply. Matching is whole-message, case-insensitive,
    /// covering the Japanese and English forms users actually type.
    pub fn parse(text: &str) -> Self {
        let t = text.trim().to_lowercase();
        const YES: &[&str] = &[
            "はい", "うん", "ok", "おけ", "いいよ", "お願い", "おねがい", "yes", "y", "実行して",
            "やって",
        ];
        const NO: &[&str] = &[
            "いいえ", "いや", "やめて", "やめる", "キャンセル", "no", "n", "だめ", "中止",
        ];
        if YES.contains(&t.as_str()) {
            Self::Approve
        } else if NO.contains(&t.as_str()) {
            Self::Deny
        } else {
            Self::Unclear
        }
    }
}

/// Kinds of multi-turn sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Guided goal-setting dialogue.
    GoalSetting,
}

/// An active multi-turn session for a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub scope: Scope,
    pub kind: SessionKind,
    pub step: u32,
    /// Session-local accumulated state.
    pub data: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(scope: Scope, kind: SessionKind, ttl_secs: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            kind,
            step: 0,
            data: serde_json::json!({}),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of feeding one message to a session continuation handler.
///
/// `Fallthrough` is the explicit "no special action, use the general path"
/// variant; handlers never signal that with an empty reply.
#[derive(Debug, Clone)]
pub enum SessionStep {
    /// Session continues; reply and persist the updated record.
    Continue { reply: String, updated: SessionRecord },
    /// Session finished; reply and clear the record.
    Complete { reply: String },
    /// The message is not for this session; end it and route to the general
    /// path, optionally carrying context the session gathered.
    Fallthrough { extra_context: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("org-1", "room-1", "user-1")
    }

    #[test]
    fn test_confirmation_reply_parse_japanese() {
        assert_eq!(ConfirmationReply::parse("はい"), ConfirmationReply::Approve);
        assert_eq!(ConfirmationReply::parse(" お願い "), ConfirmationReply::Approve);
        assert_eq!(ConfirmationReply::parse("やめて"), ConfirmationReply::Deny);
        assert_eq!(
            ConfirmationReply::parse("ところで明日の天気は?"),
            ConfirmationReply::Unclear
        );
    }

    #[test]
    fn test_confirmation_reply_parse_english() {
        assert_eq!(ConfirmationReply::parse("YES"), ConfirmationReply::Approve);
        assert_eq!(ConfirmationReply::parse("n"), ConfirmationReply::Deny);
    }

    #[test]
    fn test_pending_confirmation_expiry() {
        let pending = PendingConfirmation::new(
            scope(),
            ToolCall::new("delete_goal", json!({"goal_id": 3})),
            ReasonCode::LowConfidence,
            "ゴール3を削除します。よろしいですか?",
            "abc123",
            300,
        );
        assert!(!pending.is_expired(Utc::now()));
        assert!(pending.is_expired(Utc::now() + Duration::seconds(301)));
    }

    #[test]
    fn test_session_record_defaults() {
        let session = SessionRecord::new(scope(), SessionKind::GoalSetting, 600);
        assert_eq!(session.step, 0);
        assert!(!session.is_expired(Utc::now()));
    }
}
