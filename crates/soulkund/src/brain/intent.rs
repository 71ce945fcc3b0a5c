//! Intent engine: the LLM-backed decision stage.
//!
//! One provider call per request, with a hard deadline. On failure the call
//! is retried once with a reduced snapshot (oldest context dropped first);
//! if that fails too, the engine returns the configured fallback text — the
//! user always gets a reply. Tool calls are validated against the catalog
//! before the decision leaves this stage; malformed calls become a
//! clarifying text decision, never an execution.
//!
//! Confidence thresholds are not applied here. The authorization gate is
//! the single thresholding location.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, warn};

use soulkun_shared::{Confidence, ContextSnapshot, Decision, InboundMessage};

use crate::config::LlmConfig;
use crate::llm::{build_intent_prompt, IntentRequest, LlmProvider, RawIntent};
use crate::tools::ToolCatalog;

const CLARIFY_REPLY: &str =
    "やりたいことは伝わってきたのですが、内容をもう少し具体的に教えてもらえますか?";

/// The decision stage contract. The Brain depends on this trait so tests
/// can count and stub decisions.
#[async_trait]
pub trait IntentDecider: Send + Sync {
    async fn decide(
        &self,
        snapshot: &ContextSnapshot,
        message: &InboundMessage,
        catalog: &ToolCatalog,
    ) -> Decision;
}

pub struct IntentEngine {
    llm: Arc<dyn LlmProvider>,
    config: LlmConfig,
    fallback_reply: String,
}

impl IntentEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, config: LlmConfig, fallback_reply: String) -> Self {
        Self {
            llm,
            config,
            fallback_reply,
        }
    }

    async fn attempt(
        &self,
        snapshot: &ContextSnapshot,
        message: &InboundMessage,
        catalog: &ToolCatalog,
    ) -> Result<RawIntent, soulkun_shared::BrainError> {
        let deadline = Duration::from_secs(self.config.request_timeout_secs);
        let request = IntentRequest {
            system: String::new(),
            prompt: build_intent_prompt(snapshot, &message.body, self.config.max_prompt_bytes),
            tool_schemas: catalog.schemas(),
            timeout: deadline,
        };
        // The engine enforces its own ceiling on top of the provider's: a
        // hanging provider must not hang the request.
        match timeout(deadline, self.llm.infer_intent(request)).await {
            Ok(result) => result,
            Err(_) => Err(soulkun_shared::BrainError::Timeout(format!(
                "intent inference exceeded {}s",
                self.config.request_timeout_secs
            ))),
        }
    }

    fn decision_from(&self, raw: RawIntent, catalog: &ToolCatalog) -> Decision {
        let confidence = Confidence::normalize(raw.confidence);

        if !raw.tool_calls.is_empty() {
            for call in &raw.tool_calls {
                if let Err(violation) = catalog.validate(call) {
                    // Malformed proposal: downgrade to clarification, keep
                    // the violation in the rationale for calibration.
                    warn!(tool = %call.name, violation = %violation, "malformed tool call from provider");
                    return Decision::clarification(
                        CLARIFY_REPLY,
                        &format!("provider proposed invalid call: {}", violation),
                    );
                }
            }
            let mut decision = Decision::tool_calls(raw.tool_calls, confidence, &raw.rationale);
            decision.compound = raw.compound;
            return decision;
        }

        match raw.text {
            Some(text) if !text.trim().is_empty() => {
                Decision::text(text, confidence, &raw.rationale)
            }
            _ => Decision::clarification(CLARIFY_REPLY, "provider returned neither calls nor text"),
        }
    }
}

#[async_trait]
impl IntentDecider for IntentEngine {
    async fn decide(
        &self,
        snapshot: &ContextSnapshot,
        message: &InboundMessage,
        catalog: &ToolCatalog,
    ) -> Decision {
        match self.attempt(snapshot, message, catalog).await {
            Ok(raw) => self.decision_from(raw, catalog),
            Err(first_err) => {
                warn!(error = %first_err, "intent inference failed, retrying with reduced context");
                let reduced = snapshot.reduced();
                match self.attempt(&reduced, message, catalog).await {
                    Ok(raw) => {
                        info!("reduced-context retry succeeded");
                        self.decision_from(raw, catalog)
                    }
                    Err(second_err) => {
                        warn!(error = %second_err, "intent inference failed twice, using fallback reply");
                        Decision::text(
                            self.fallback_reply.clone(),
                            Confidence::zero(),
                            "provider unavailable after reduced-context retry",
                        )
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use soulkun_shared::{BrainError, DecisionBody, RawConfidence, Scope, ToolCall};

    use crate::storage::NullStorage;
    use crate::tools::default_catalog;

    /// Provider that never returns.
    struct HangingProvider;

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn infer_intent(&self, _request: IntentRequest) -> Result<RawIntent, BrainError> {
            std::future::pending().await
        }
        async fn complete_text(
            &self,
            _system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, BrainError> {
            std::future::pending().await
        }
    }

    /// Provider that fails once, then returns a fixed intent.
    struct FlakyProvider {
        calls: AtomicU32,
        intent_tool: String,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn infer_intent(&self, request: IntentRequest) -> Result<RawIntent, BrainError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(BrainError::Llm("connection reset".to_string()));
            }
            // The retry must carry less context than a full snapshot would.
            assert!(request.prompt.len() < 4096);
            Ok(RawIntent {
                tool_calls: vec![ToolCall::new(&self.intent_tool, json!({"title": "見積もり"}))],
                text: None,
                confidence: Some(RawConfidence::Scalar(0.9)),
                rationale: "retry worked".to_string(),
                compound: false,
            })
        }
        async fn complete_text(
            &self,
            _system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, BrainError> {
            Ok("ok".to_string())
        }
    }

    /// Provider that proposes a call the catalog rejects.
    struct MalformedProvider;

    #[async_trait]
    impl LlmProvider for MalformedProvider {
        async fn infer_intent(&self, _request: IntentRequest) -> Result<RawIntent, BrainError> {
            Ok(RawIntent {
                tool_calls: vec![ToolCall::new("delete_goal", json!({"goal_id": "three"}))],
                text: None,
                confidence: Some(RawConfidence::Scalar(0.95)),
                rationale: "confident but wrong".to_string(),
                compound: false,
            })
        }
        async fn complete_text(
            &self,
            _system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, BrainError> {
            Ok("ok".to_string())
        }
    }

    fn engine_with(provider: Arc<dyn LlmProvider>, timeout_secs: u64) -> IntentEngine {
        IntentEngine::new(
            provider,
            LlmConfig {
                request_timeout_secs: timeout_secs,
                ..LlmConfig::default()
            },
            "もう一度お願いします。".to_string(),
        )
    }

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot::minimal(Scope::new("org", "room", "user"), "山田")
    }

    #[tokio::test]
    async fn test_hanging_provider_fails_closed_within_bound() {
        let engine = engine_with(Arc::new(HangingProvider), 1);
        let catalog = default_catalog(Arc::new(NullStorage));
        let message = InboundMessage::local("room", "user", "タスク作って");

        let started = Instant::now();
        let decision = engine.decide(&snapshot(), &message, &catalog).await;

        // Two attempts at 1s each, plus slack.
        assert!(started.elapsed() < Duration::from_secs(4));
        match decision.body {
            DecisionBody::Text(text) => assert_eq!(text, "もう一度お願いします。"),
            other => panic!("expected fallback text, got {:?}", other),
        }
        assert_eq!(decision.confidence.overall, 0.0);
    }

    #[tokio::test]
    async fn test_retry_with_reduced_context_succeeds() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            intent_tool: "create_task".to_string(),
        });
        let engine = engine_with(provider.clone(), 2);
        let catalog = default_catalog(Arc::new(NullStorage));
        let message = InboundMessage::local("room", "user", "見積もりタスク作って");

        let decision = engine.decide(&snapshot(), &message, &catalog).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(decision.proposes_action());
        assert_eq!(decision.first_call().unwrap().name, "create_task");
    }

    #[tokio::test]
    async fn test_malformed_tool_call_becomes_clarification() {
        let engine = engine_with(Arc::new(MalformedProvider), 2);
        let catalog = default_catalog(Arc::new(NullStorage));
        let message = InboundMessage::local("room", "user", "ゴール3消して");

        let decision = engine.decide(&snapshot(), &message, &catalog).await;
        assert!(!decision.proposes_action());
        assert!(decision.malformed);
        assert_eq!(decision.confidence.overall, 0.0);
        match decision.body {
            DecisionBody::Text(text) => assert_eq!(text, CLARIFY_REPLY),
            other => panic!("expected clarification, got {:?}", other),
        }
    }
}
