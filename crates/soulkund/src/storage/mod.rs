//! Storage capability interface.
//!
//! Every component that needs persistence takes an `Arc<dyn Storage>`; the
//! degraded path is [`NullStorage`], a typed no-op backend, not a scattered
//! optional-pool check. All queries are scoped by organization id; session,
//! confirmation, and mode rows are keyed by the full (org, room, user)
//! scope with upsert semantics.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use soulkun_shared::{
    BrainError, Commitment, ConversationMode, ConversationTurn, ExecutionResult, GoalMemory,
    PendingConfirmation, PersonMemory, Scope, SessionRecord, TaskMemory, Teaching, ValueAxis,
};

/// One appended decision-log row. The only persistence of a Decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub scope: Scope,
    pub message_hash: String,
    /// "tool_calls" or "text"
    pub decision_kind: String,
    pub tool_names: Vec<String>,
    pub confidence_overall: f64,
    /// Verdict kind string ("approve", "block", ...)
    pub verdict: String,
    pub reason: String,
    pub success: Option<bool>,
    pub latency_ms: u64,
    /// Redacted before it gets here.
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

/// A soft conflict observed by a consistency authority, logged for later
/// review regardless of the final verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftConflictRecord {
    pub id: Uuid,
    pub scope: Scope,
    /// "value" or "commitment"
    pub source: String,
    /// The axis or commitment that matched.
    pub subject: String,
    pub action_name: String,
    pub message_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Detected user feedback on a previous reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub scope: Scope,
    /// "positive" or "negative"
    pub polarity: String,
    pub message_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A scheduled reminder created by the `set_reminder` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub scope: Scope,
    pub text: String,
    pub due_at: DateTime<Utc>,
}

/// Persistence capability consumed by the pipeline, the tool handlers, the
/// learning writer, and the reminder worker.
#[async_trait]
pub trait Storage: Send + Sync {
    // -- conversation window --

    async fn append_turn(&self, scope: &Scope, turn: &ConversationTurn)
        -> Result<(), BrainError>;
    /// Last `limit` turns, oldest first.
    async fn recent_turns(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, BrainError>;

    // -- memory excerpts --

    async fn load_people(&self, scope: &Scope, limit: usize)
        -> Result<Vec<PersonMemory>, BrainError>;
    async fn load_teachings(&self, scope: &Scope, limit: usize)
        -> Result<Vec<Teaching>, BrainError>;
    async fn load_value_axes(&self, scope: &Scope, limit: usize)
        -> Result<Vec<ValueAxis>, BrainError>;
    async fn load_commitments(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<Commitment>, BrainError>;
    async fn search_teachings(
        &self,
        scope: &Scope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Teaching>, BrainError>;
    async fn add_teaching(&self, scope: &Scope, content: &str) -> Result<i64, BrainError>;

    // -- goals / tasks --

    async fn create_goal(
        &self,
        scope: &Scope,
        title: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError>;
    async fn list_goals(&self, scope: &Scope, limit: usize)
        -> Result<Vec<GoalMemory>, BrainError>;
    /// Returns false when the goal does not exist in this scope.
    async fn update_goal_progress(
        &self,
        scope: &Scope,
        goal_id: i64,
        pct: u8,
    ) -> Result<bool, BrainError>;
    async fn delete_goal(&self, scope: &Scope, goal_id: i64) -> Result<bool, BrainError>;
    async fn create_task(
        &self,
        scope: &Scope,
        title: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError>;
    async fn complete_task(&self, scope: &Scope, task_id: i64) -> Result<bool, BrainError>;
    async fn list_tasks(&self, scope: &Scope, limit: usize)
        -> Result<Vec<TaskMemory>, BrainError>;

    // -- session / confirmation / mode (one row per scope, upsert) --

    async fn active_session(&self, scope: &Scope) -> Result<Option<SessionRecord>, BrainError>;
    async fn upsert_session(&self, session: &SessionRecord) -> Result<(), BrainError>;
    async fn clear_session(&self, scope: &Scope) -> Result<(), BrainError>;
    async fn pending_confirmation(
        &self,
        scope: &Scope,
    ) -> Result<Option<PendingConfirmation>, BrainError>;
    async fn upsert_confirmation(&self, pending: &PendingConfirmation) -> Result<(), BrainError>;
    async fn delete_confirmation(&self, scope: &Scope) -> Result<(), BrainError>;
    async fn conversation_mode(
        &self,
        scope: &Scope,
    ) -> Result<Option<(ConversationMode, DateTime<Utc>)>, BrainError>;
    async fn set_conversation_mode(
        &self,
        scope: &Scope,
        mode: ConversationMode,
        until: DateTime<Utc>,
    ) -> Result<(), BrainError>;
    async fn clear_conversation_mode(&self, scope: &Scope) -> Result<(), BrainError>;

    // -- idempotent execution --

    async fn executed_result(&self, key: &str) -> Result<Option<ExecutionResult>, BrainError>;
    async fn record_execution(
        &self,
        key: &str,
        scope: &Scope,
        result: &ExecutionResult,
    ) -> Result<(), BrainError>;

    // -- learning / audit --

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), BrainError>;
    async fn record_soft_conflict(&self, record: &SoftConflictRecord) -> Result<(), BrainError>;
    async fn record_feedback(&self, record: &FeedbackRecord) -> Result<(), BrainError>;
    /// Review path: newest soft conflicts first for an organization.
    async fn recent_soft_conflicts(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<SoftConflictRecord>, BrainError>;
    /// Review path: newest decision records first for an organization.
    async fn recent_decisions(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, BrainError>;

    // -- reminders --

    async fn add_reminder(
        &self,
        scope: &Scope,
        text: &str,
        due_at: DateTime<Utc>,
    ) -> Result<i64, BrainError>;
    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, BrainError>;
    /// Claim a reminder for sending. Returns true exactly once per reminder
    /// — the idempotency guard for at-least-once scheduling.
    async fn claim_reminder(&self, id: i64, idempotency_key: &str) -> Result<bool, BrainError>;
}

/// Typed no-op backend: reads return empty, writes succeed and vanish.
///
/// Keeps the Brain available when persistence is down and backs tests that
/// don't care about storage.
pub struct NullStorage;

#[async_trait]
impl Storage for NullStorage {
    async fn append_turn(&self, _: &Scope, _: &ConversationTurn) -> Result<(), BrainError> {
        Ok(())
    }
    async fn recent_turns(
        &self,
        _: &Scope,
        _: usize,
    ) -> Result<Vec<ConversationTurn>, BrainError> {
        Ok(Vec::new())
    }
    async fn load_people(&self, _: &Scope, _: usize) -> Result<Vec<PersonMemory>, BrainError> {
        Ok(Vec::new())
    }
    async fn load_teachings(&self, _: &Scope, _: usize) -> Result<Vec<Teaching>, BrainError> {
        Ok(Vec::new())
    }
    async fn load_value_axes(&self, _: &Scope, _: usize) -> Result<Vec<ValueAxis>, BrainError> {
        Ok(Vec::new())
    }
    async fn load_commitments(&self, _: &Scope, _: usize) -> Result<Vec<Commitment>, BrainError> {
        Ok(Vec::new())
    }
    async fn search_teachings(
        &self,
        _: &Scope,
        _: &str,
        _: usize,
    ) -> Result<Vec<Teaching>, BrainError> {
        Ok(Vec::new())
    }
    async fn add_teaching(&self, _: &Scope, _: &str) -> Result<i64, BrainError> {
        Ok(0)
    }
    async fn create_goal(
        &self,
        _: &Scope,
        _: &str,
        _: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError> {
        Ok(0)
    }
    async fn list_goals(&self, _: &Scope, _: usize) -> Result<Vec<GoalMemory>, BrainError> {
        Ok(Vec::new())
    }
    async fn update_goal_progress(&self, _: &Scope, _: i64, _: u8) -> Result<bool, BrainError> {
        Ok(false)
    }
    async fn delete_goal(&self, _: &Scope, _: i64) -> Result<bool, BrainError> {
        Ok(false)
    }
    async fn create_task(
        &self,
        _: &Scope,
        _: &str,
        _: Option<DateTime<Utc>>,
    ) -> Result<i64, BrainError> {
        Ok(0)
    }
    async fn complete_task(&self, _: &Scope, _: i64) -> Result<bool, BrainError> {
        Ok(false)
    }
    async fn list_tasks(&self, _: &Scope, _: usize) -> Result<Vec<TaskMemory>, BrainError> {
        Ok(Vec::new())
    }
    async fn active_session(&self, _: &Scope) -> Result<Option<SessionRecord>, BrainError> {
        Ok(None)
    }
    async fn upsert_session(&self, _: &SessionRecord) -> Result<(), BrainError> {
        Ok(())
    }
    async fn clear_session(&self, _: &Scope) -> Result<(), BrainError> {
        Ok(())
    }
    async fn pending_confirmation(
        &self,
        _: &Scope,
    ) -> Result<Option<PendingConfirmation>, BrainError> {
        Ok(None)
    }
    async fn upsert_confirmation(&self, _: &PendingConfirmation) -> Result<(), BrainError> {
        Ok(())
    }
    async fn delete_confirmation(&self, _: &Scope) -> Result<(), BrainError> {
        Ok(())
    }
    async fn conversation_mode(
        &self,
        _: &Scope,
    ) -> Result<Option<(ConversationMode, DateTime<Utc>)>, BrainError> {
        Ok(None)
    }
    async fn set_conversation_mode(
        &self,
        _: &Scope,
        _: ConversationMode,
        _: DateTime<Utc>,
    ) -> Result<(), BrainError> {
        Ok(())
    }
    async fn clear_conversation_mode(&self, _: &Scope) -> Result<(), BrainError> {
        Ok(())
    }
    async fn executed_result(&self, _: &str) -> Result<Option<ExecutionResult>, BrainError> {
        Ok(None)
    }
    async fn record_execution(
        &self,
        _: &str,
        _: &Scope,
        _: &ExecutionResult,
    ) -> Result<(), BrainError> {
        Ok(())
    }
    async fn record_decision(&self, _: &DecisionRecord) -> Result<(), BrainError> {
        Ok(())
    }
    async fn record_soft_conflict(&self, _: &SoftConflictRecord) -> Result<(), BrainError> {
        Ok(())
    }
    async fn record_feedback(&self, _: &FeedbackRecord) -> Result<(), BrainError> {
        Ok(())
    }
    async fn recent_soft_conflicts(
        &self,
        _: &str,
        _: usize,
    ) -> Result<Vec<SoftConflictRecord>, BrainError> {
        Ok(Vec::new())
    }
    async fn recent_decisions(
        &self,
        _: &str,
        _: usize,
    ) -> Result<Vec<DecisionRecord>, BrainError> {
        Ok(Vec::new())
    }
    async fn add_reminder(
        &self,
        _: &Scope,
        _: &str,
        _: DateTime<Utc>,
    ) -> Result<i64, BrainError> {
        Ok(0)
    }
    async fn due_reminders(&self, _: DateTime<Utc>, _: usize) -> Result<Vec<Reminder>, BrainError> {
        Ok(Vec::new())
    }
    async fn claim_reminder(&self, _: i64, _: &str) -> Result<bool, BrainError> {
        Ok(false)
    }
}
