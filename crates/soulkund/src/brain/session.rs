//! Continuation handling for pending confirmations and multi-turn sessions.
//!
//! While a scope has a pending confirmation or an active session, inbound
//! messages land here instead of the general intent path — the
//! serialization invariant that keeps unrelated actions from being approved
//! while an earlier action still awaits the same user's answer.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::info;

use soulkun_shared::{
    ConfirmationReply, InboundMessage, PendingConfirmation, SessionKind, SessionRecord,
    SessionStep,
};

/// Outcome of resolving a pending confirmation with one message.
#[derive(Debug, Clone)]
pub enum ConfirmationOutcome {
    /// User approved: run the stored action with the confirmation id as
    /// idempotency key, then delete the record.
    Approved(PendingConfirmation),
    /// User declined: delete the record and acknowledge.
    Denied { reply: String },
    /// The record outlived its TTL: delete it and tell the user.
    Expired { reply: String },
    /// Neither yes nor no: keep the record, re-prompt.
    Reprompt { reply: String },
}

/// Interpret one inbound message against a pending confirmation.
pub fn resolve_confirmation(
    pending: PendingConfirmation,
    message: &InboundMessage,
    now: DateTime<Utc>,
) -> ConfirmationOutcome {
    if pending.is_expired(now) {
        info!(confirmation = %pending.id, "pending confirmation expired");
        return ConfirmationOutcome::Expired {
            reply: "さっきの確認は時間切れになったので、実行していません。必要ならもう一度お願いします。"
                .to_string(),
        };
    }

    match ConfirmationReply::parse(&message.body) {
        ConfirmationReply::Approve => {
            info!(confirmation = %pending.id, tool = %pending.action.name, "confirmation approved");
            ConfirmationOutcome::Approved(pending)
        }
        ConfirmationReply::Deny => {
            info!(confirmation = %pending.id, "confirmation denied");
            ConfirmationOutcome::Denied {
                reply: "わかりました、実行しません。".to_string(),
            }
        }
        ConfirmationReply::Unclear => ConfirmationOutcome::Reprompt {
            reply: format!("「はい」か「いいえ」で教えてください。{}", pending.prompt),
        },
    }
}

/// Does this message deterministically start a goal-setting session?
pub fn wants_goal_session(text: &str) -> bool {
    let t = text.trim();
    (t.contains("ゴール") && (t.contains("設定") || t.contains("決めたい")))
        || t.contains("目標を立てたい")
}

/// Opening line of a new goal-setting session.
pub fn goal_session_opening() -> String {
    "いいですね、ゴールを決めましょう。どんなゴールにしますか?一文で教えてください。".to_string()
}

const CANCEL_WORDS: &[&str] = &["やめる", "やめて", "中止", "キャンセル", "やっぱりいい"];

/// Advance the goal-setting dialogue by one message.
///
/// Step 0 collects the title, step 1 collects the deadline and registers
/// the goal. A cancel word completes the session without registering; a
/// message that clearly is not an answer falls through to the general path
/// with the gathered context attached.
pub async fn advance_goal_session(
    mut session: SessionRecord,
    message: &InboundMessage,
    storage: &std::sync::Arc<dyn crate::storage::Storage>,
) -> SessionStep {
    debug_assert_eq!(session.kind, SessionKind::GoalSetting);
    let text = message.body.trim();

    if CANCEL_WORDS.iter().any(|w| text.contains(w)) {
        return SessionStep::Complete {
            reply: "わかりました、ゴール設定はまた今度にしましょう。".to_string(),
        };
    }

    match session.step {
        0 => {
            if text.is_empty() {
                return SessionStep::Continue {
                    reply: "どんなゴールにしますか?一文で教えてください。".to_string(),
                    updated: session,
                };
            }
            session.data["title"] = serde_json::Value::String(text.to_string());
            session.step = 1;
            SessionStep::Continue {
                reply: "期限はいつにしますか? (例: 2026-09-30 / 「なし」でも大丈夫です)"
                    .to_string(),
                updated: session,
            }
        }
        _ => {
            let title = session.data["title"].as_str().unwrap_or("").to_string();
            let due = if text == "なし" {
                None
            } else {
                match parse_date(text) {
                    Some(due) => Some(due),
                    None => {
                        // Not an answer to the question: hand the message
                        // to the general path, carrying what the session
                        // gathered.
                        return SessionStep::Fallthrough {
                            extra_context: Some(format!(
                                "ゴール設定の途中でした (仮タイトル: {})",
                                title
                            )),
                        };
                    }
                }
            };
            match storage.create_goal(&session.scope, &title, due).await {
                Ok(id) => SessionStep::Complete {
                    reply: match due {
                        Some(_) => format!(
                            "ゴール「{}」を期限 {} で登録しました (#{})",
                            title, text, id
                        ),
                        None => format!("ゴール「{}」を期限なしで登録しました (#{})", title, id),
                    },
                },
                Err(e) => {
                    info!(error = %e, "goal registration failed at session completion");
                    SessionStep::Complete {
                        reply: format!(
                            "ごめんなさい、ゴール「{}」の登録に失敗しました。少し後でもう一度お願いします。",
                            title
                        ),
                    }
                }
            }
        }
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(23, 59, 59)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use soulkun_shared::{ReasonCode, Scope, ToolCall};

    fn scope() -> Scope {
        Scope::new("org-1", "room-1", "user-1")
    }

    fn pending() -> PendingConfirmation {
        PendingConfirmation::new(
            scope(),
            ToolCall::new("delete_goal", json!({"goal_id": 3})),
            ReasonCode::LowConfidence,
            "ゴール3を削除します。よろしいですか?",
            "hash",
            600,
        )
    }

    #[test]
    fn test_confirmation_approved() {
        let message = InboundMessage::local("room-1", "user-1", "はい");
        match resolve_confirmation(pending(), &message, Utc::now()) {
            ConfirmationOutcome::Approved(p) => assert_eq!(p.action.name, "delete_goal"),
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn test_confirmation_denied() {
        let message = InboundMessage::local("room-1", "user-1", "いいえ");
        assert!(matches!(
            resolve_confirmation(pending(), &message, Utc::now()),
            ConfirmationOutcome::Denied { .. }
        ));
    }

    #[test]
    fn test_confirmation_expired() {
        let message = InboundMessage::local("room-1", "user-1", "はい");
        let later = Utc::now() + Duration::seconds(601);
        assert!(matches!(
            resolve_confirmation(pending(), &message, later),
            ConfirmationOutcome::Expired { .. }
        ));
    }

    #[test]
    fn test_confirmation_unclear_reprompts() {
        let message = InboundMessage::local("room-1", "user-1", "ところで天気は?");
        match resolve_confirmation(pending(), &message, Utc::now()) {
            ConfirmationOutcome::Reprompt { reply } => {
                assert!(reply.contains("はい"));
                assert!(reply.contains("ゴール3を削除します"));
            }
            other => panic!("expected reprompt, got {:?}", other),
        }
    }

    #[test]
    fn test_goal_session_trigger() {
        assert!(wants_goal_session("ゴールを設定したい"));
        assert!(wants_goal_session("目標を立てたいんだけど"));
        assert!(!wants_goal_session("今日のタスクを見せて"));
    }

    #[tokio::test]
    async fn test_goal_session_two_steps_complete_and_registers() {
        let storage: std::sync::Arc<dyn crate::storage::Storage> =
            std::sync::Arc::new(crate::storage::SqliteStorage::open_in_memory().await.unwrap());
        let session = SessionRecord::new(scope(), SessionKind::GoalSetting, 600);

        let message = InboundMessage::local("room-1", "user-1", "売上を2倍にする");
        let step = advance_goal_session(session, &message, &storage).await;
        let updated = match step {
            SessionStep::Continue { reply, updated } => {
                assert!(reply.contains("期限"));
                assert_eq!(updated.step, 1);
                updated
            }
            other => panic!("expected continue, got {:?}", other),
        };

        let message = InboundMessage::local("room-1", "user-1", "2026-12-31");
        match advance_goal_session(updated, &message, &storage).await {
            SessionStep::Complete { reply } => {
                assert!(reply.contains("売上を2倍にする"));
                assert!(reply.contains("2026-12-31"));
            }
            other => panic!("expected complete, got {:?}", other),
        }

        // The goal really was registered.
        let goals = storage.list_goals(&scope(), 10).await.unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].title, "売上を2倍にする");
    }

    #[tokio::test]
    async fn test_goal_session_cancel_registers_nothing() {
        let storage: std::sync::Arc<dyn crate::storage::Storage> =
            std::sync::Arc::new(crate::storage::SqliteStorage::open_in_memory().await.unwrap());
        let session = SessionRecord::new(scope(), SessionKind::GoalSetting, 600);
        let message = InboundMessage::local("room-1", "user-1", "やっぱりいいや");
        assert!(matches!(
            advance_goal_session(session, &message, &storage).await,
            SessionStep::Complete { .. }
        ));
        assert!(storage.list_goals(&scope(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_goal_session_fallthrough_carries_context() {
        let storage: std::sync::Arc<dyn crate::storage::Storage> =
            std::sync::Arc::new(crate::storage::NullStorage);
        let mut session = SessionRecord::new(scope(), SessionKind::GoalSetting, 600);
        session.step = 1;
        session.data = json!({"title": "売上を2倍にする"});

        let message = InboundMessage::local("room-1", "user-1", "先にタスク一覧を見せて?");
        match advance_goal_session(session, &message, &storage).await {
            SessionStep::Fallthrough { extra_context } => {
                assert!(extra_context.unwrap().contains("売上を2倍にする"));
            }
            other => panic!("expected fallthrough, got {:?}", other),
        }
    }
}
