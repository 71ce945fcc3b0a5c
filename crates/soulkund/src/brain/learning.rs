//! Learning layer: fire-and-forget capture of decisions and outcomes.
//!
//! Events go into an unbounded channel drained by a background writer task.
//! `record` never blocks, never errors into the caller, and never delays
//! the reply. Write failures are logged server-side and dropped.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use soulkun_shared::Scope;

use crate::storage::{DecisionRecord, FeedbackRecord, SoftConflictRecord, Storage};

/// One captured event.
#[derive(Debug, Clone)]
pub enum LearningEvent {
    Decision(DecisionRecord),
    SoftConflict(SoftConflictRecord),
    Feedback(FeedbackRecord),
}

/// Cheap cloneable handle for producers.
#[derive(Clone)]
pub struct LearningLayer {
    tx: mpsc::UnboundedSender<LearningEvent>,
}

impl LearningLayer {
    /// Start the background writer. The handle is returned for shutdown
    /// joins; dropping every `LearningLayer` clone ends the task.
    pub fn spawn(storage: Arc<dyn Storage>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LearningEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result = match &event {
                    LearningEvent::Decision(record) => storage.record_decision(record).await,
                    LearningEvent::SoftConflict(record) => {
                        storage.record_soft_conflict(record).await
                    }
                    LearningEvent::Feedback(record) => storage.record_feedback(record).await,
                };
                if let Err(e) = result {
                    warn!(error = %e, "learning write failed, event dropped");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// A handle whose events go nowhere, for tests.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Enqueue an event. Never blocks; a closed channel is ignored.
    pub fn record(&self, event: LearningEvent) {
        let _ = self.tx.send(event);
    }

    pub fn record_soft_conflict(
        &self,
        scope: &Scope,
        source: &str,
        subject: &str,
        action_name: &str,
        message_hash: &str,
    ) {
        self.record(LearningEvent::SoftConflict(SoftConflictRecord {
            id: Uuid::new_v4(),
            scope: scope.clone(),
            source: source.to_string(),
            subject: subject.to_string(),
            action_name: action_name.to_string(),
            message_hash: message_hash.to_string(),
            created_at: Utc::now(),
        }));
    }
}

/// Simple feedback-phrase detection on inbound messages.
///
/// Returns "positive" / "negative", or None for ordinary messages.
pub fn detect_feedback(text: &str) -> Option<&'static str> {
    const POSITIVE: &[&str] = &["ありがとう", "助かった", "助かりました", "さすが", "完璧"];
    const NEGATIVE: &[&str] = &["違う", "ちがう", "そうじゃない", "間違って", "ダメだった"];
    if POSITIVE.iter().any(|p| text.contains(p)) {
        Some("positive")
    } else if NEGATIVE.iter().any(|p| text.contains(p)) {
        Some("negative")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::storage::SqliteStorage;

    #[tokio::test]
    async fn test_record_is_nonblocking_and_written() {
        let storage = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let (layer, _handle) = LearningLayer::spawn(storage.clone());

        let scope = Scope::new("org", "room", "user");
        layer.record_soft_conflict(&scope, "value", "家族との時間", "create_task", "hash");

        // Drain happens in the background.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let conflicts = storage.recent_soft_conflicts("org", 10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].subject, "家族との時間");
        assert_eq!(conflicts[0].source, "value");
    }

    #[tokio::test]
    async fn test_disconnected_handle_never_errors() {
        let layer = LearningLayer::disconnected();
        let scope = Scope::new("org", "room", "user");
        // The receiver is gone; this must still be a quiet no-op.
        layer.record_soft_conflict(&scope, "value", "x", "y", "z");
    }

    #[test]
    fn test_detect_feedback() {
        assert_eq!(detect_feedback("ありがとう、助かった!"), Some("positive"));
        assert_eq!(detect_feedback("いや、そうじゃないんだよ"), Some("negative"));
        assert_eq!(detect_feedback("今日の予定を教えて"), None);
    }
}
