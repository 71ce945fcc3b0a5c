//! Consistency authorities: value alignment and long-term commitments.
//!
//! Both authorities answer the same question — does this action fit what
//! the user has already decided? A hard conflict (the action directly
//! contradicts an explicit prior decision) blocks with a suggestion; a soft
//! conflict (thematically related, not explicitly contradictory) requires
//! confirmation. Soft conflicts are always logged asynchronously by the
//! gate, whatever the final verdict.

use async_trait::async_trait;

use soulkun_shared::{ContextSnapshot, ConversationMode, ReasonCode, ToolCall};

/// Authority verdict, pre-gate.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityDecision {
    Approve,
    BlockAndSuggest,
    RequireConfirmation,
    /// Part of the contract; neither built-in authority currently emits it.
    ForceModeSwitch(ConversationMode),
}

/// Evaluation outcome of one authority.
#[derive(Debug, Clone)]
pub struct AuthorityOutcome {
    pub decision: AuthorityDecision,
    pub reason: ReasonCode,
    /// The axis or commitment that matched.
    pub subject: Option<String>,
    /// User-facing text for non-approve decisions.
    pub message: Option<String>,
    /// True when a soft conflict was observed (logged regardless of the
    /// decision).
    pub soft_conflict: bool,
}

impl AuthorityOutcome {
    pub fn approve() -> Self {
        Self {
            decision: AuthorityDecision::Approve,
            reason: ReasonCode::Approved,
            subject: None,
            message: None,
            soft_conflict: false,
        }
    }
}

/// A consistency evaluator over the context snapshot.
#[async_trait]
pub trait ConsistencyAuthority: Send + Sync {
    /// Short name used in soft-conflict log rows ("value" / "commitment").
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        action: Option<&ToolCall>,
        message: &str,
        snapshot: &ContextSnapshot,
    ) -> AuthorityOutcome;
}

/// Case-insensitive phrase search over the combined message/action text.
fn find_phrase<'a>(haystack: &str, phrases: &'a [String]) -> Option<&'a str> {
    let lowered = haystack.to_lowercase();
    phrases
        .iter()
        .find(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
        .map(|p| p.as_str())
}

fn scan_text(action: Option<&ToolCall>, message: &str) -> String {
    let mut text = message.to_string();
    if let Some(call) = action {
        text.push('\n');
        text.push_str(&call.name);
        text.push('\n');
        text.push_str(&call.params.to_string());
    }
    text
}

/// Checks proposed actions against the user's declared value axes.
pub struct ValueAuthority;

#[async_trait]
impl ConsistencyAuthority for ValueAuthority {
    fn name(&self) -> &'static str {
        "value"
    }

    async fn evaluate(
        &self,
        action: Option<&ToolCall>,
        message: &str,
        snapshot: &ContextSnapshot,
    ) -> AuthorityOutcome {
        let text = scan_text(action, message);

        for axis in &snapshot.value_axes {
            if let Some(rule) = find_phrase(&text, &axis.hard_rules) {
                return AuthorityOutcome {
                    decision: AuthorityDecision::BlockAndSuggest,
                    reason: ReasonCode::ValueConflict,
                    subject: Some(axis.name.clone()),
                    message: Some(format!(
                        "「{}」は、以前決めた『{}』と真っ向からぶつかりそうです。\
                         まずその決定を見直すところから話しませんか?",
                        rule, axis.statement
                    )),
                    soft_conflict: false,
                };
            }
        }

        for axis in &snapshot.value_axes {
            if find_phrase(&text, &axis.themes).is_some() {
                return AuthorityOutcome {
                    decision: AuthorityDecision::RequireConfirmation,
                    reason: ReasonCode::ValueConflict,
                    subject: Some(axis.name.clone()),
                    message: Some(format!(
                        "これは大事にしている『{}』に関わりそうです。このまま進めて大丈夫ですか?",
                        axis.name
                    )),
                    soft_conflict: true,
                };
            }
        }

        AuthorityOutcome::approve()
    }
}

/// Checks proposed actions against persisted long-term commitments.
pub struct MemoryAuthority;

#[async_trait]
impl ConsistencyAuthority for MemoryAuthority {
    fn name(&self) -> &'static str {
        "commitment"
    }

    async fn evaluate(
        &self,
        action: Option<&ToolCall>,
        message: &str,
        snapshot: &ContextSnapshot,
    ) -> AuthorityOutcome {
        let text = scan_text(action, message);

        for commitment in &snapshot.commitments {
            if let Some(rule) = find_phrase(&text, &commitment.hard_rules) {
                return AuthorityOutcome {
                    decision: AuthorityDecision::BlockAndSuggest,
                    reason: ReasonCode::CommitmentConflict,
                    subject: Some(commitment.summary.clone()),
                    message: Some(format!(
                        "「{}」は、{}に決めた『{}』と矛盾します。\
                         約束を変えるなら、先にそちらを整理しましょう。",
                        rule,
                        commitment.decided_at.format("%Y-%m-%d"),
                        commitment.summary
                    )),
                    soft_conflict: false,
                };
            }
        }

        for commitment in &snapshot.commitments {
            if find_phrase(&text, &commitment.themes).is_some() {
                return AuthorityOutcome {
                    decision: AuthorityDecision::RequireConfirmation,
                    reason: ReasonCode::CommitmentConflict,
                    subject: Some(commitment.summary.clone()),
                    message: Some(format!(
                        "以前の約束『{}』に関係しそうです。進めてよければ「はい」と答えてください。",
                        commitment.summary
                    )),
                    soft_conflict: true,
                };
            }
        }

        AuthorityOutcome::approve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use soulkun_shared::{Commitment, Provenance, Scope, ValueAxis};

    fn snapshot_with_axis() -> ContextSnapshot {
        let mut snap = ContextSnapshot::minimal(Scope::new("o", "r", "u"), "x");
        snap.value_axes.push(ValueAxis {
            name: "家族との時間".to_string(),
            statement: "平日の夜は家族と過ごす".to_string(),
            hard_rules: vec!["毎晩残業".to_string()],
            themes: vec!["残業".to_string(), "夜の予定".to_string()],
            provenance: Provenance::user_stated("u", Utc::now()),
        });
        snap
    }

    fn snapshot_with_commitment() -> ContextSnapshot {
        let mut snap = ContextSnapshot::minimal(Scope::new("o", "r", "u"), "x");
        snap.commitments.push(Commitment {
            summary: "今期は新規採用をしない".to_string(),
            hard_rules: vec!["採用を始め".to_string()],
            themes: vec!["採用".to_string()],
            decided_at: Utc::now(),
            provenance: Provenance::user_stated("u", Utc::now()),
        });
        snap
    }

    #[tokio::test]
    async fn test_value_hard_conflict_blocks() {
        let outcome = ValueAuthority
            .evaluate(None, "今月は毎晩残業する予定を入れて", &snapshot_with_axis())
            .await;
        assert_eq!(outcome.decision, AuthorityDecision::BlockAndSuggest);
        assert_eq!(outcome.reason, ReasonCode::ValueConflict);
        assert!(!outcome.soft_conflict);
        assert!(outcome.message.unwrap().contains("家族"));
    }

    #[tokio::test]
    async fn test_value_soft_conflict_requires_confirmation() {
        let outcome = ValueAuthority
            .evaluate(None, "明日は残業になりそう", &snapshot_with_axis())
            .await;
        assert_eq!(outcome.decision, AuthorityDecision::RequireConfirmation);
        assert!(outcome.soft_conflict);
    }

    #[tokio::test]
    async fn test_commitment_hard_conflict_blocks() {
        let call = ToolCall::new("create_task", json!({"title": "中途採用を始める"}));
        let outcome = MemoryAuthority
            .evaluate(Some(&call), "これ進めて", &snapshot_with_commitment())
            .await;
        assert_eq!(outcome.decision, AuthorityDecision::BlockAndSuggest);
        assert_eq!(outcome.reason, ReasonCode::CommitmentConflict);
    }

    #[tokio::test]
    async fn test_empty_snapshot_approves() {
        let snap = ContextSnapshot::minimal(Scope::new("o", "r", "u"), "x");
        let outcome = ValueAuthority.evaluate(None, "残業について", &snap).await;
        assert_eq!(outcome.decision, AuthorityDecision::Approve);
    }
}
