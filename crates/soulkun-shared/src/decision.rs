//! The intent engine's output for one request.

use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::tools::ToolCall;

/// What the engine decided to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBody {
    /// Execute these tool calls, in order.
    ToolCalls(Vec<ToolCall>),
    /// Reply with this text; no action.
    Text(String),
}

/// One decision per request. Created by the intent engine, consumed by the
/// authorization gate, and discarded afterwards — only the decision log
/// record persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub body: DecisionBody,
    pub confidence: Confidence,
    /// Free-text explanation for the audit trail; never shown to the user.
    pub rationale: String,
    /// The engine's signal that the request is compound (multi-step); the
    /// gate's workflow check consumes this.
    pub compound: bool,
    /// Set when the provider proposed tool calls that failed catalog
    /// validation and the decision was downgraded to a clarification.
    pub malformed: bool,
}

impl Decision {
    pub fn text(text: impl Into<String>, confidence: Confidence, rationale: &str) -> Self {
        Self {
            body: DecisionBody::Text(text.into()),
            confidence,
            rationale: rationale.to_string(),
            compound: false,
            malformed: false,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>, confidence: Confidence, rationale: &str) -> Self {
        Self {
            body: DecisionBody::ToolCalls(calls),
            confidence,
            rationale: rationale.to_string(),
            compound: false,
            malformed: false,
        }
    }

    /// A clarification downgrade after catalog validation rejected the
    /// provider's tool calls. Treated as insufficient confidence downstream.
    pub fn clarification(text: impl Into<String>, rationale: &str) -> Self {
        Self {
            body: DecisionBody::Text(text.into()),
            confidence: Confidence::zero(),
            rationale: rationale.to_string(),
            compound: false,
            malformed: true,
        }
    }

    pub fn proposes_action(&self) -> bool {
        matches!(&self.body, DecisionBody::ToolCalls(calls) if !calls.is_empty())
    }

    pub fn first_call(&self) -> Option<&ToolCall> {
        match &self.body {
            DecisionBody::ToolCalls(calls) => calls.first(),
            DecisionBody::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_decision_has_no_action() {
        let d = Decision::text("了解です", Confidence::certain(), "greeting");
        assert!(!d.proposes_action());
        assert!(d.first_call().is_none());
    }

    #[test]
    fn test_tool_decision_proposes_action() {
        let d = Decision::tool_calls(
            vec![ToolCall::new("create_task", json!({"title": "見積もり"}))],
            Confidence::certain(),
            "task creation request",
        );
        assert!(d.proposes_action());
        assert_eq!(d.first_call().unwrap().name, "create_task");
    }

    #[test]
    fn test_clarification_is_malformed_with_zero_confidence() {
        let d = Decision::clarification("もう少し詳しく教えてください", "invalid params");
        assert!(d.malformed);
        assert_eq!(d.confidence.overall, 0.0);
        assert!(!d.proposes_action());
    }
}
