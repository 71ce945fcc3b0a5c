//! HTTP payloads for soulkunctl ↔ soulkund communication.

use serde::{Deserialize, Serialize};

/// `POST /v1/message` request: run one message through the pipeline as a
/// synthetic local room/user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub body: String,
}

/// `POST /v1/message` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub reply: String,
    /// Verdict kind string for inspection ("approve", "block", ...).
    pub verdict: String,
    pub latency_ms: u64,
}

/// `GET /v1/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub requests_handled: u64,
    pub llm_model: String,
    pub storage: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_request_roundtrip() {
        let req = SendMessageRequest {
            room_id: "room-1".to_string(),
            user_id: "user-1".to_string(),
            user_name: None,
            body: "今月のゴールを見せて".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: SendMessageRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, req.body);
        assert!(back.user_name.is_none());
    }
}
