//! Authorization verdicts.
//!
//! Exactly one verdict is produced per request by the authorization gate.
//! The first evaluator that returns non-approve decides; its user-facing
//! message is the only one that may surface.

use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Conversational mode of a room/user pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Normal,
    /// Empathetic, no-tools mode forced by the guardian for risk-classified
    /// messages.
    Listening,
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Listening => "listening",
        };
        write!(f, "{}", s)
    }
}

/// Machine-readable cause of a verdict, recorded in the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Approved,
    SelfHarmRisk,
    RetentionRisk,
    OrganizationalCriticism,
    HrSensitive,
    DataLeakage,
    DestructiveOperation,
    ValueConflict,
    CommitmentConflict,
    LowConfidence,
    CompoundRequest,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::SelfHarmRisk => "self_harm_risk",
            Self::RetentionRisk => "retention_risk",
            Self::OrganizationalCriticism => "organizational_criticism",
            Self::HrSensitive => "hr_sensitive",
            Self::DataLeakage => "data_leakage",
            Self::DestructiveOperation => "destructive_operation",
            Self::ValueConflict => "value_conflict",
            Self::CommitmentConflict => "commitment_conflict",
            Self::LowConfidence => "low_confidence",
            Self::CompoundRequest => "compound_request",
        }
    }
}

/// The four possible outcomes of authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Approve,
    Block,
    RequireConfirmation,
    ForceModeSwitch,
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::Block => "block",
            Self::RequireConfirmation => "require_confirmation",
            Self::ForceModeSwitch => "force_mode_switch",
        };
        write!(f, "{}", s)
    }
}

/// The gate's final answer for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationVerdict {
    pub decision: VerdictKind,
    pub reason: ReasonCode,
    /// User-facing text from the triggering evaluator (block explanation,
    /// confirmation prompt, or mode-switch reply). Generic fallbacks are
    /// filled in by the gate when the evaluator supplied none.
    pub alternative_message: Option<String>,
    /// Present only for [`VerdictKind::ForceModeSwitch`].
    pub forced_mode: Option<ConversationMode>,
}

impl AuthorizationVerdict {
    pub fn approve() -> Self {
        Self {
            decision: VerdictKind::Approve,
            reason: ReasonCode::Approved,
            alternative_message: None,
            forced_mode: None,
        }
    }

    pub fn block(reason: ReasonCode, message: Option<String>) -> Self {
        Self {
            decision: VerdictKind::Block,
            reason,
            alternative_message: message,
            forced_mode: None,
        }
    }

    pub fn require_confirmation(reason: ReasonCode, prompt: Option<String>) -> Self {
        Self {
            decision: VerdictKind::RequireConfirmation,
            reason,
            alternative_message: prompt,
            forced_mode: None,
        }
    }

    pub fn force_mode_switch(
        reason: ReasonCode,
        mode: ConversationMode,
        message: Option<String>,
    ) -> Self {
        Self {
            decision: VerdictKind::ForceModeSwitch,
            reason,
            alternative_message: message,
            forced_mode: Some(mode),
        }
    }

    pub fn is_approve(&self) -> bool {
        self.decision == VerdictKind::Approve
    }
}

/// A multi-step plan produced by the workflow decomposition check for
/// compound requests. Replaces the engine's single-call decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub steps: Vec<ToolCall>,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_mode_switch_carries_mode() {
        let v = AuthorizationVerdict::force_mode_switch(
            ReasonCode::RetentionRisk,
            ConversationMode::Listening,
            Some("そうなんだ。よかったら聞かせて。".to_string()),
        );
        assert_eq!(v.decision, VerdictKind::ForceModeSwitch);
        assert_eq!(v.forced_mode, Some(ConversationMode::Listening));
        assert!(v.alternative_message.is_some());
    }

    #[test]
    fn test_approve_has_no_message() {
        let v = AuthorizationVerdict::approve();
        assert!(v.is_approve());
        assert!(v.alternative_message.is_none());
        assert!(v.forced_mode.is_none());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ConversationMode::Listening.to_string(), "listening");
    }
}
