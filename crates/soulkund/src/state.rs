//! Daemon state management.
//!
//! Process-scoped state constructed in `main` and injected into the server
//! handlers. No module globals.

use std::sync::Arc;
use std::time::Instant;

use soulkun_shared::rpc::StatusResponse;
use soulkun_shared::VERSION;
use tokio::sync::RwLock;

pub struct DaemonStateInner {
    pub started_at: Instant,
    pub requests_handled: u64,
    pub llm_model: String,
    pub storage_label: String,
}

impl DaemonStateInner {
    pub fn new(llm_model: &str, storage_label: &str) -> Self {
        Self {
            started_at: Instant::now(),
            requests_handled: 0,
            llm_model: llm_model.to_string(),
            storage_label: storage_label.to_string(),
        }
    }

    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            version: VERSION.to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            requests_handled: self.requests_handled,
            llm_model: self.llm_model.clone(),
            storage: self.storage_label.clone(),
        }
    }
}

/// Thread-safe shared state handle
pub type SharedState = Arc<RwLock<DaemonStateInner>>;

pub fn create_shared_state(llm_model: &str, storage_label: &str) -> SharedState {
    Arc::new(RwLock::new(DaemonStateInner::new(llm_model, storage_label)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_snapshot() {
        let state = create_shared_state("qwen2.5:7b-instruct", "sqlite");
        state.write().await.requests_handled += 3;
        let status = state.read().await.to_status();
        assert_eq!(status.requests_handled, 3);
        assert_eq!(status.llm_model, "qwen2.5:7b-instruct");
        assert_eq!(status.version, VERSION);
    }
}
