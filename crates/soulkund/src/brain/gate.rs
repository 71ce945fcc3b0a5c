//! Authorization gate: the strictly-sequential verdict pipeline.
//!
//! Guardian → ValueAuthority → MemoryAuthority → workflow decomposition →
//! confidence threshold. The first non-approve short-circuits; exactly one
//! verdict leaves this stage, carrying only the triggering evaluator's
//! user-facing message (with a generic fallback when none was supplied).
//!
//! The confidence threshold check lives here and only here.

use std::sync::Arc;

use tracing::{debug, info};

use soulkun_shared::{
    message_hash, AuthorizationVerdict, ContextSnapshot, ConversationMode, Decision,
    DecisionBody, InboundMessage, ReasonCode, WorkflowPlan,
};

use crate::brain::authority::{AuthorityDecision, ConsistencyAuthority};
use crate::brain::guardian::{Guardian, GuardianDecision};
use crate::brain::learning::LearningLayer;

const GENERIC_BLOCK: &str = "その内容はここでは進められませんでした。別の形でお手伝いできますか?";
const GENERIC_CONFIRM: &str = "この操作を実行してよいですか?「はい」か「いいえ」で教えてください。";
const GENERIC_LISTEN: &str = "いまは急がなくて大丈夫です。よかったら詳しく聞かせてください。";

/// Gate output: the verdict, plus a multi-step plan when the workflow
/// check replaced the single-call decision.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub verdict: AuthorizationVerdict,
    pub plan: Option<WorkflowPlan>,
}

pub struct AuthorizationGate {
    guardian: Guardian,
    values: Arc<dyn ConsistencyAuthority>,
    commitments: Arc<dyn ConsistencyAuthority>,
    confirm_threshold: f64,
    learning: LearningLayer,
}

impl AuthorizationGate {
    pub fn new(
        guardian: Guardian,
        values: Arc<dyn ConsistencyAuthority>,
        commitments: Arc<dyn ConsistencyAuthority>,
        confirm_threshold: f64,
        learning: LearningLayer,
    ) -> Self {
        Self {
            guardian,
            values,
            commitments,
            confirm_threshold,
            learning,
        }
    }

    /// Run the full evaluator sequence for one decision.
    pub async fn authorize(
        &self,
        message: &InboundMessage,
        decision: &Decision,
        snapshot: &ContextSnapshot,
    ) -> Authorization {
        let action = decision.first_call();
        let hash = message_hash(&message.body);

        // 1. Guardian: rule-based safety, independent of the LLM.
        let guardian_outcome = self.guardian.evaluate(&message.body, action);
        if let Some(advisory) = guardian_outcome.advisory {
            debug!(advisory = advisory.as_str(), "guardian advisory (verdict unchanged)");
        }
        for observed in &guardian_outcome.observed {
            debug!(observed = observed.as_str(), "guardian lower-severity match");
        }
        match guardian_outcome.decision {
            GuardianDecision::ForceModeSwitch => {
                info!(reason = guardian_outcome.reason.as_str(), "guardian forced mode switch");
                return Authorization {
                    verdict: AuthorizationVerdict::force_mode_switch(
                        guardian_outcome.reason,
                        ConversationMode::Listening,
                        Some(
                            guardian_outcome
                                .suggestion
                                .unwrap_or_else(|| GENERIC_LISTEN.to_string()),
                        ),
                    ),
                    plan: None,
                };
            }
            GuardianDecision::BlockAndSuggest => {
                info!(reason = guardian_outcome.reason.as_str(), "guardian blocked action");
                return Authorization {
                    verdict: AuthorizationVerdict::block(
                        guardian_outcome.reason,
                        Some(
                            guardian_outcome
                                .suggestion
                                .unwrap_or_else(|| GENERIC_BLOCK.to_string()),
                        ),
                    ),
                    plan: None,
                };
            }
            GuardianDecision::Approve => {}
        }

        // 2-3. Consistency authorities, in fixed order.
        for authority in [&self.values, &self.commitments] {
            let outcome = authority.evaluate(action, &message.body, snapshot).await;

            // Soft conflicts are logged whatever the final verdict; the
            // write never blocks this path.
            if outcome.soft_conflict {
                self.learning.record_soft_conflict(
                    &snapshot.scope,
                    authority.name(),
                    outcome.subject.as_deref().unwrap_or("unknown"),
                    action.map(|c| c.name.as_str()).unwrap_or(""),
                    &hash,
                );
            }

            match outcome.decision {
                AuthorityDecision::Approve => {}
                AuthorityDecision::BlockAndSuggest => {
                    info!(
                        authority = authority.name(),
                        reason = outcome.reason.as_str(),
                        "authority blocked action"
                    );
                    return Authorization {
                        verdict: AuthorizationVerdict::block(
                            outcome.reason,
                            Some(outcome.message.unwrap_or_else(|| GENERIC_BLOCK.to_string())),
                        ),
                        plan: None,
                    };
                }
                AuthorityDecision::RequireConfirmation => {
                    info!(
                        authority = authority.name(),
                        reason = outcome.reason.as_str(),
                        "authority requires confirmation"
                    );
                    return Authorization {
                        verdict: AuthorizationVerdict::require_confirmation(
                            outcome.reason,
                            Some(outcome.message.unwrap_or_else(|| GENERIC_CONFIRM.to_string())),
                        ),
                        plan: None,
                    };
                }
                AuthorityDecision::ForceModeSwitch(mode) => {
                    return Authorization {
                        verdict: AuthorizationVerdict::force_mode_switch(
                            outcome.reason,
                            mode,
                            Some(outcome.message.unwrap_or_else(|| GENERIC_LISTEN.to_string())),
                        ),
                        plan: None,
                    };
                }
            }
        }

        // 4. Workflow decomposition, only when the engine flagged a
        // compound request.
        let plan = decompose(decision);
        if let Some(ref p) = plan {
            info!(steps = p.steps.len(), "compound request decomposed into plan");
        }

        // 5. Confidence threshold: the single thresholding location.
        if decision.proposes_action() && decision.confidence.overall < self.confirm_threshold {
            info!(
                confidence = decision.confidence.overall,
                threshold = self.confirm_threshold,
                "confidence below threshold, requiring confirmation"
            );
            let prompt = action
                .map(|c| {
                    format!(
                        "「{}」を実行しようとしています。{}",
                        c.name, GENERIC_CONFIRM
                    )
                })
                .unwrap_or_else(|| GENERIC_CONFIRM.to_string());
            return Authorization {
                verdict: AuthorizationVerdict::require_confirmation(
                    ReasonCode::LowConfidence,
                    Some(prompt),
                ),
                plan,
            };
        }

        Authorization {
            verdict: AuthorizationVerdict::approve(),
            plan,
        }
    }
}

/// Turn a compound decision into an ordered multi-step plan.
fn decompose(decision: &Decision) -> Option<WorkflowPlan> {
    if !decision.compound {
        return None;
    }
    match &decision.body {
        DecisionBody::ToolCalls(calls) if !calls.is_empty() => Some(WorkflowPlan {
            steps: calls.clone(),
            summary: format!("{}ステップの実行計画", calls.len()),
        }),
        _ => None,
    }
}
