//! Scheduled background workers.
//!
//! Independent of the request path. The reminder sweep claims each due
//! reminder before sending (an UPDATE that succeeds exactly once), so
//! at-least-once scheduling never double-delivers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::ChannelAdapter;
use crate::storage::Storage;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SWEEP_BATCH: usize = 50;

/// Spawn the periodic reminder sweep.
pub fn spawn_reminder_worker(
    storage: Arc<dyn Storage>,
    channels: Vec<Arc<dyn ChannelAdapter>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sweep_once(&storage, &channels).await;
        }
    })
}

/// One sweep pass: claim each due reminder, then deliver it.
pub async fn sweep_once(storage: &Arc<dyn Storage>, channels: &[Arc<dyn ChannelAdapter>]) {
    let due = match storage.due_reminders(Utc::now(), SWEEP_BATCH).await {
        Ok(due) => due,
        Err(e) => {
            warn!(error = %e, "reminder sweep query failed");
            return;
        }
    };

    for reminder in due {
        let claim_key = format!("sweep-{}", Uuid::new_v4());
        match storage.claim_reminder(reminder.id, &claim_key).await {
            Ok(true) => {}
            Ok(false) => continue, // another sweep got it first
            Err(e) => {
                warn!(error = %e, reminder = reminder.id, "reminder claim failed");
                continue;
            }
        }

        let text = format!("リマインダーです: {}", reminder.text);
        let mut delivered = false;
        for channel in channels {
            match channel.send(&reminder.scope.room_id, &text).await {
                Ok(true) => {
                    delivered = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, channel = %channel.kind(), "reminder delivery failed");
                }
            }
        }
        if delivered {
            info!(reminder = reminder.id, room = %reminder.scope.room_id, "reminder sent");
        } else {
            warn!(reminder = reminder.id, "reminder claimed but no channel delivered it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use soulkun_shared::{BrainError, ChannelKind, Scope};

    use crate::storage::SqliteStorage;

    struct RecordingChannel {
        sends: AtomicU32,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Local
        }
        async fn send(&self, _room_id: &str, _text: &str) -> Result<bool, BrainError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        fn allows_room(&self, _room_id: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_sweep_sends_once_even_when_repeated() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let scope = Scope::new("org-1", "room-1", "user-1");
        storage
            .add_reminder(&scope, "日報を出す", Utc::now())
            .await
            .unwrap();

        let channel = Arc::new(RecordingChannel {
            sends: AtomicU32::new(0),
        });
        let channels: Vec<Arc<dyn ChannelAdapter>> = vec![channel.clone()];

        // Two sweeps simulate at-least-once scheduling; the claim makes the
        // second a no-op.
        sweep_once(&storage, &channels).await;
        sweep_once(&storage, &channels).await;

        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_ignores_future_reminders() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let scope = Scope::new("org-1", "room-1", "user-1");
        storage
            .add_reminder(&scope, "来週の件", Utc::now() + chrono::Duration::days(7))
            .await
            .unwrap();

        let channel = Arc::new(RecordingChannel {
            sends: AtomicU32::new(0),
        });
        sweep_once(&storage, &[channel.clone() as Arc<dyn ChannelAdapter>]).await;

        assert_eq!(channel.sends.load(Ordering::SeqCst), 0);
    }
}
