//! Shared types and contracts for Soulkun components.
//!
//! Single source of truth for the data model that crosses crate boundaries:
//! message envelopes, the context snapshot, decisions, authorization
//! verdicts, tool/result contracts, and confirmation/session records.

pub mod confidence;
pub mod confirmation;
pub mod context;
pub mod decision;
pub mod error;
pub mod message;
pub mod rpc;
pub mod tools;
pub mod verdict;

pub use confidence::{Confidence, RawConfidence};
pub use confirmation::{
    ConfirmationReply, PendingConfirmation, SessionKind, SessionRecord, SessionStep,
};
pub use context::{
    Commitment, ContextSnapshot, ConversationTurn, GoalMemory, PersonMemory, Provenance, Scope,
    TaskMemory, Teaching, TurnRole, ValueAxis,
};
pub use decision::{Decision, DecisionBody};
pub use error::BrainError;
pub use message::{ChannelKind, InboundMessage, OutboundReply};
pub use tools::{
    ErrorKind, ExecutionResult, HandlerError, HandlerReply, ParamKind, ParamSpec, ParamViolation,
    RiskLevel, ToolCall, ToolSpec,
};
pub use verdict::{
    AuthorizationVerdict, ConversationMode, ReasonCode, VerdictKind, WorkflowPlan,
};

/// Crate version, shared by daemon and ctl status output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stable hex digest of a message body, used for confirmation records and
/// idempotency keys.
pub fn message_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_hash_stable() {
        let a = message_hash("ゴール3を削除して");
        let b = message_hash("ゴール3を削除して");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_message_hash_differs() {
        assert_ne!(message_hash("a"), message_hash("b"));
    }
}
