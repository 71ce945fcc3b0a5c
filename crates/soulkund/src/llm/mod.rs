//! LLM provider abstraction.
//!
//! The pipeline talks to one trait; provider wire formats stay inside the
//! adapter. The provider returns a raw intent (tool calls or text, with
//! whatever confidence shape it produced); normalization into the typed
//! [`soulkun_shared::Confidence`] happens in the intent engine.

pub mod ollama;

pub use ollama::OllamaProvider;

use std::time::Duration;

use async_trait::async_trait;

use soulkun_shared::{BrainError, ContextSnapshot, RawConfidence, ToolCall};

/// One intent inference request.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub system: String,
    pub prompt: String,
    /// Tool schema catalog, one JSON schema fragment per tool.
    pub tool_schemas: Vec<serde_json::Value>,
    pub timeout: Duration,
}

/// Provider output before validation and confidence normalization.
#[derive(Debug, Clone)]
pub struct RawIntent {
    pub tool_calls: Vec<ToolCall>,
    pub text: Option<String>,
    pub confidence: Option<RawConfidence>,
    pub rationale: String,
    /// Provider's multi-step signal for the workflow decomposition check.
    pub compound: bool,
}

/// Provider-agnostic LLM interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Infer an intent (tool calls or a direct reply) for one message.
    async fn infer_intent(&self, request: IntentRequest) -> Result<RawIntent, BrainError>;

    /// Plain text completion, used by the listening-mode responder.
    async fn complete_text(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BrainError>;
}

/// Render the context snapshot and message into the intent prompt.
///
/// The snapshot is serialized most-important-first so the byte cap trims
/// memory excerpts before it trims the conversation window.
pub fn build_intent_prompt(
    snapshot: &ContextSnapshot,
    message: &str,
    max_bytes: usize,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## 発言者\n{} (user {}, room {})",
        snapshot.display_name, snapshot.scope.user_id, snapshot.scope.room_id
    ));

    if !snapshot.recent_turns.is_empty() {
        let turns: Vec<String> = snapshot
            .recent_turns
            .iter()
            .map(|t| {
                let who = match t.role {
                    soulkun_shared::TurnRole::User => "user",
                    soulkun_shared::TurnRole::Assistant => "assistant",
                };
                format!("{}: {}", who, t.text)
            })
            .collect();
        sections.push(format!("## 直近の会話\n{}", turns.join("\n")));
    }

    if !snapshot.goals.is_empty() {
        let goals: Vec<String> = snapshot
            .goals
            .iter()
            .map(|g| format!("#{} {} ({}%)", g.id, g.title, g.progress_pct))
            .collect();
        sections.push(format!("## ゴール\n{}", goals.join("\n")));
    }

    if !snapshot.tasks.is_empty() {
        let tasks: Vec<String> = snapshot
            .tasks
            .iter()
            .map(|t| {
                format!(
                    "#{} {} [{}]",
                    t.id,
                    t.title,
                    if t.done { "done" } else { "open" }
                )
            })
            .collect();
        sections.push(format!("## タスク\n{}", tasks.join("\n")));
    }

    if !snapshot.people.is_empty() {
        let people: Vec<String> = snapshot
            .people
            .iter()
            .map(|p| format!("{} ({}): {}", p.name, p.relation, p.note))
            .collect();
        sections.push(format!("## 関係者\n{}", people.join("\n")));
    }

    if !snapshot.teachings.is_empty() {
        let teachings: Vec<String> = snapshot
            .teachings
            .iter()
            .map(|t| format!("- {}", t.content))
            .collect();
        sections.push(format!("## 教わったルール\n{}", teachings.join("\n")));
    }

    let mut prompt = sections.join("\n\n");
    prompt.push_str(&format!("\n\n## メッセージ\n{}", message));

    // Trim whole sections from the tail of the context (never the message)
    // until the prompt fits.
    while prompt.len() > max_bytes && sections.len() > 1 {
        sections.pop();
        prompt = sections.join("\n\n");
        prompt.push_str(&format!("\n\n## メッセージ\n{}", message));
    }

    prompt
}

/// System prompt for intent inference: reply JSON only.
pub fn intent_system_prompt(tool_schemas: &[serde_json::Value]) -> String {
    let catalog = serde_json::to_string_pretty(tool_schemas).unwrap_or_else(|_| "[]".to_string());
    format!(
        "あなたは業務アシスタント「ソウルくん」の意図解析エンジンです。\n\
         利用できるツール一覧:\n{}\n\n\
         必ず次のJSONだけを出力してください:\n\
         {{\"tool_calls\": [{{\"name\": \"...\", \"params\": {{...}}}}],\n\
         \"reply\": \"ツールを使わない場合の返答\",\n\
         \"confidence\": {{\"intent\": 0.0, \"parameters\": 0.0, \"overall\": 0.0}},\n\
         \"rationale\": \"判断理由\",\n\
         \"compound\": false}}\n\
         ツールが不要ならtool_callsは空配列にし、replyに返答を入れてください。\n\
         複数の手順が必要な依頼はcompoundをtrueにしてください。",
        catalog
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use soulkun_shared::{ContextSnapshot, ConversationTurn, Scope, TurnRole};

    fn snapshot() -> ContextSnapshot {
        let mut snap =
            ContextSnapshot::minimal(Scope::new("org", "room", "user"), "山田");
        for i in 0..4 {
            snap.recent_turns.push(ConversationTurn {
                role: TurnRole::User,
                text: format!("メッセージ{}", i),
                at: Utc::now(),
            });
        }
        snap
    }

    #[test]
    fn test_prompt_contains_message_and_speaker() {
        let prompt = build_intent_prompt(&snapshot(), "今日のタスクは?", 8192);
        assert!(prompt.contains("今日のタスクは?"));
        assert!(prompt.contains("山田"));
    }

    #[test]
    fn test_prompt_respects_byte_cap() {
        let prompt = build_intent_prompt(&snapshot(), "短い質問", 200);
        // The message always survives trimming.
        assert!(prompt.contains("短い質問"));
        assert!(prompt.len() < 8192);
    }

    #[test]
    fn test_system_prompt_embeds_catalog() {
        let schemas = vec![serde_json::json!({"name": "create_task"})];
        let system = intent_system_prompt(&schemas);
        assert!(system.contains("create_task"));
        assert!(system.contains("tool_calls"));
    }
}
