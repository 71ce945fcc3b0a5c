//! Context builder: one immutable snapshot per inbound message.
//!
//! All memory fetches run concurrently with a per-source deadline. A source
//! that errors or is still pending at the deadline contributes an empty
//! list — the Brain never becomes unavailable because a memory subsystem
//! is.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::warn;

use soulkun_shared::{ContextSnapshot, InboundMessage, Scope};

use crate::config::BrainConfig;
use crate::storage::Storage;

pub struct ContextBuilder {
    storage: Arc<dyn Storage>,
    fetch_timeout: Duration,
    window: usize,
    excerpt_limit: usize,
}

impl ContextBuilder {
    pub fn new(storage: Arc<dyn Storage>, config: &BrainConfig) -> Self {
        Self {
            storage,
            fetch_timeout: Duration::from_millis(config.context_fetch_timeout_ms),
            window: config.conversation_window,
            excerpt_limit: config.memory_excerpt_limit,
        }
    }

    /// Build the snapshot. Never fails: missing sources become empty lists.
    pub async fn build(&self, message: &InboundMessage, scope: Scope) -> ContextSnapshot {
        let (turns, people, goals, tasks, teachings, value_axes, commitments) = tokio::join!(
            self.fetch("turns", self.storage.recent_turns(&scope, self.window)),
            self.fetch("people", self.storage.load_people(&scope, self.excerpt_limit)),
            self.fetch("goals", self.storage.list_goals(&scope, self.excerpt_limit)),
            self.fetch("tasks", self.storage.list_tasks(&scope, self.excerpt_limit)),
            self.fetch(
                "teachings",
                self.storage.load_teachings(&scope, self.excerpt_limit)
            ),
            self.fetch(
                "value_axes",
                self.storage.load_value_axes(&scope, self.excerpt_limit)
            ),
            self.fetch(
                "commitments",
                self.storage.load_commitments(&scope, self.excerpt_limit)
            ),
        );

        ContextSnapshot {
            scope,
            display_name: message.sender_name.clone(),
            recent_turns: turns,
            people,
            goals,
            tasks,
            teachings,
            value_axes,
            commitments,
            built_at: Utc::now(),
        }
    }

    async fn fetch<T>(
        &self,
        label: &str,
        fut: impl std::future::Future<Output = Result<Vec<T>, soulkun_shared::BrainError>>,
    ) -> Vec<T> {
        match timeout(self.fetch_timeout, fut).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!(source = label, error = %e, "memory fetch failed, using empty");
                Vec::new()
            }
            Err(_) => {
                warn!(source = label, "memory fetch timed out, using empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use soulkun_shared::{
        BrainError, Commitment, ConversationMode, ConversationTurn, ExecutionResult, GoalMemory,
        PendingConfirmation, PersonMemory, SessionRecord, TaskMemory, Teaching, ValueAxis,
    };

    use crate::storage::{
        DecisionRecord, FeedbackRecord, NullStorage, Reminder, SoftConflictRecord,
    };

    /// Storage whose goal reads hang forever and whose people reads error.
    struct DegradedStorage;

    #[async_trait]
    impl Storage for DegradedStorage {
        async fn append_turn(&self, _: &Scope, _: &ConversationTurn) -> Result<(), BrainError> {
            Ok(())
        }
        async fn recent_turns(
            &self,
            _: &Scope,
            _: usize,
        ) -> Result<Vec<ConversationTurn>, BrainError> {
            Ok(vec![ConversationTurn {
                role: soulkun_shared::TurnRole::User,
                text: "前の発言".to_string(),
                at: Utc::now(),
            }])
        }
        async fn load_people(&self, _: &Scope, _: usize) -> Result<Vec<PersonMemory>, BrainError> {
            Err(BrainError::Storage("people table corrupt".to_string()))
        }
        async fn load_teachings(&self, _: &Scope, _: usize) -> Result<Vec<Teaching>, BrainError> {
            Ok(Vec::new())
        }
        async fn load_value_axes(&self, _: &Scope, _: usize) -> Result<Vec<ValueAxis>, BrainError> {
            Ok(Vec::new())
        }
        async fn load_commitments(
            &self,
            _: &Scope,
            _: usize,
        ) -> Result<Vec<Commitment>, BrainError> {
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
            // Never resolves: must be cut off by the per-source deadline.
            std::future::pending().await
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
        async fn due_reminders(
            &self,
            _: DateTime<Utc>,
            _: usize,
        ) -> Result<Vec<Reminder>, BrainError> {
            Ok(Vec::new())
        }
        async fn claim_reminder(&self, _: i64, _: &str) -> Result<bool, BrainError> {
            Ok(false)
        }
    }

    fn config() -> BrainConfig {
        BrainConfig {
            context_fetch_timeout_ms: 50,
            ..BrainConfig::default()
        }
    }

    #[tokio::test]
    async fn test_degraded_sources_become_empty() {
        let builder = ContextBuilder::new(Arc::new(DegradedStorage), &config());
        let message = InboundMessage::local("room-1", "user-1", "おはよう");
        let scope = Scope::new("org-1", "room-1", "user-1");

        let started = std::time::Instant::now();
        let snapshot = builder.build(&message, scope).await;

        // The hanging goals fetch was cut off by its deadline, not awaited
        // forever.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(snapshot.goals.is_empty());
        // The erroring people fetch degraded to empty.
        assert!(snapshot.people.is_empty());
        // The healthy source still contributed.
        assert_eq!(snapshot.recent_turns.len(), 1);
    }

    #[tokio::test]
    async fn test_null_storage_builds_minimal_snapshot() {
        let builder = ContextBuilder::new(Arc::new(NullStorage), &config());
        let message = InboundMessage::local("room-1", "user-1", "こんにちは");
        let scope = Scope::new("org-1", "room-1", "user-1");
        let snapshot = builder.build(&message, scope.clone()).await;
        assert_eq!(snapshot.scope, scope);
        assert_eq!(snapshot.excerpt_count(), 0);
        assert_eq!(snapshot.display_name, "user-1");
    }
}
