//! The Brain: one message in, one reply out.
//!
//! Pipeline: continuation routing (pending confirmation / active session) →
//! mode check → context snapshot → intent → authorization → execution →
//! reply assembly, with the learning layer recording asynchronously off the
//! critical path. The outermost handler never lets a message go
//! unanswered: any fault degrades to a generic retry reply.

pub mod authority;
pub mod context;
pub mod executor;
pub mod gate;
pub mod guardian;
pub mod intent;
pub mod learning;
pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use soulkun_shared::{
    message_hash, BrainError, ConversationMode, ConversationTurn, Decision, DecisionBody,
    ExecutionResult, InboundMessage, OutboundReply, PendingConfirmation, Scope, SessionKind,
    SessionRecord, SessionStep, ToolCall, TurnRole, VerdictKind,
};

use crate::config::BrainConfig;
use crate::llm::LlmProvider;
use crate::redact::redact;
use crate::storage::{DecisionRecord, FeedbackRecord, Storage};
use crate::tools::ToolCatalog;

use self::context::ContextBuilder;
use self::executor::ToolExecutor;
use self::gate::AuthorizationGate;
use self::intent::IntentDecider;
use self::learning::{detect_feedback, LearningEvent, LearningLayer};
use self::session::{
    advance_goal_session, goal_session_opening, resolve_confirmation, wants_goal_session,
    ConfirmationOutcome,
};

const GENERIC_FAILURE: &str =
    "ごめんなさい、少し調子が悪いみたいです。もう一度話しかけてもらえますか?";
const LISTENING_FALLBACK: &str = "うん、聞いています。続きを話してもらって大丈夫ですよ。";
const LISTENING_SYSTEM: &str =
    "あなたは聞き役に徹するアシスタントです。助言や提案はせず、相手の気持ちを受け止めて\
     短く共感的に返してください。業務の処理や提案はこの場ではしません。";

/// Everything the Brain depends on, injected for testability.
pub struct BrainDeps {
    pub storage: Arc<dyn Storage>,
    pub catalog: Arc<ToolCatalog>,
    pub intent: Arc<dyn IntentDecider>,
    pub llm: Arc<dyn LlmProvider>,
    pub gate: AuthorizationGate,
    pub executor: ToolExecutor,
    pub learning: LearningLayer,
}

pub struct Brain {
    storage: Arc<dyn Storage>,
    catalog: Arc<ToolCatalog>,
    intent: Arc<dyn IntentDecider>,
    llm: Arc<dyn LlmProvider>,
    gate: AuthorizationGate,
    executor: ToolExecutor,
    learning: LearningLayer,
    builder: ContextBuilder,
    config: BrainConfig,
}

impl Brain {
    pub fn new(deps: BrainDeps, config: BrainConfig) -> Self {
        let builder = ContextBuilder::new(Arc::clone(&deps.storage), &config);
        Self {
            storage: deps.storage,
            catalog: deps.catalog,
            intent: deps.intent,
            llm: deps.llm,
            gate: deps.gate,
            executor: deps.executor,
            learning: deps.learning,
            builder,
            config,
        }
    }

    /// Entry point: always replies.
    pub async fn handle_message(&self, message: &InboundMessage, scope: Scope) -> HandleOutcome {
        let started = Instant::now();
        info!(
            room = %scope.room_id,
            user = %scope.user_id,
            channel = %message.channel,
            "handling inbound message"
        );

        let (text, verdict) = match self.process(message, &scope, started).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %redact(&e.to_string()), "pipeline fault, sending generic reply");
                (GENERIC_FAILURE.to_string(), None)
            }
        };

        self.remember_turn(&scope, TurnRole::Assistant, &text).await;
        HandleOutcome {
            reply: OutboundReply::new(&message.room_id, text),
            verdict,
        }
    }

    async fn process(
        &self,
        message: &InboundMessage,
        scope: &Scope,
        started: Instant,
    ) -> Result<(String, Option<VerdictKind>), BrainError> {
        self.remember_turn(scope, TurnRole::User, &message.body).await;
        self.capture_feedback(scope, message);

        // Serialization rule: a pending confirmation or active session owns
        // the next message from this scope. No fresh intent decision while
        // either is unresolved.
        if let Some(pending) = self.read_confirmation(scope).await {
            let text = self.continue_confirmation(pending, message, scope).await;
            return Ok((text, None));
        }

        if let Some(active) = self.read_session(scope).await {
            match self.continue_session(active, message, scope).await {
                SessionFollowup::Reply(text) => return Ok((text, None)),
                SessionFollowup::Fallthrough(extra) => {
                    let mut augmented = message.clone();
                    if let Some(extra) = extra {
                        augmented.body = format!("{}\n({})", message.body, extra);
                    }
                    return self.general_path(&augmented, scope, started).await;
                }
            }
        }

        // A forced listening mode persists until its TTL runs out.
        if self.listening_mode_active(scope).await {
            return Ok((self.listening_reply(message).await, None));
        }

        // Deterministic session trigger, ahead of the LLM.
        if wants_goal_session(&message.body) {
            let session = SessionRecord::new(
                scope.clone(),
                SessionKind::GoalSetting,
                self.config.session_ttl_secs,
            );
            if let Err(e) = self.storage.upsert_session(&session).await {
                warn!(error = %e, "failed to start goal session, using general path");
            } else {
                return Ok((goal_session_opening(), None));
            }
        }

        self.general_path(message, scope, started).await
    }

    /// Context → intent → gate → execution.
    async fn general_path(
        &self,
        message: &InboundMessage,
        scope: &Scope,
        started: Instant,
    ) -> Result<(String, Option<VerdictKind>), BrainError> {
        let snapshot = self.builder.build(message, scope.clone()).await;
        let decision = self.intent.decide(&snapshot, message, &self.catalog).await;
        let auth = self.gate.authorize(message, &decision, &snapshot).await;

        let (reply, success) = match auth.verdict.decision {
            VerdictKind::ForceModeSwitch => {
                let until = Utc::now() + chrono::Duration::seconds(self.config.listening_ttl_secs);
                if let Err(e) = self
                    .storage
                    .set_conversation_mode(scope, ConversationMode::Listening, until)
                    .await
                {
                    warn!(error = %e, "failed to persist listening mode");
                }
                // The decision is discarded: no tool runs on this path.
                let text = auth
                    .verdict
                    .alternative_message
                    .clone()
                    .unwrap_or_else(|| LISTENING_FALLBACK.to_string());
                (text, None)
            }
            VerdictKind::Block => {
                let text = auth
                    .verdict
                    .alternative_message
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                (text, None)
            }
            VerdictKind::RequireConfirmation => {
                let text = self
                    .park_for_confirmation(message, scope, &decision, &auth)
                    .await;
                (text, None)
            }
            VerdictKind::Approve => {
                let (text, success) = self.execute_decision(message, scope, &decision, &auth).await;
                (text, success)
            }
        };

        self.log_decision(scope, message, &decision, &auth, success, started);
        Ok((reply, Some(auth.verdict.decision)))
    }

    /// Persist a pending confirmation and return its prompt.
    async fn park_for_confirmation(
        &self,
        message: &InboundMessage,
        scope: &Scope,
        decision: &Decision,
        auth: &gate::Authorization,
    ) -> String {
        let prompt = auth
            .verdict
            .alternative_message
            .clone()
            .unwrap_or_else(|| "この操作を実行してよいですか?".to_string());

        let (action, followups) = match &auth.plan {
            Some(plan) if !plan.steps.is_empty() => {
                (plan.steps[0].clone(), plan.steps[1..].to_vec())
            }
            _ => match decision.first_call() {
                Some(call) => (call.clone(), Vec::new()),
                // Nothing to execute later; the prompt itself is the reply.
                None => return prompt,
            },
        };

        let pending = PendingConfirmation::new(
            scope.clone(),
            action,
            auth.verdict.reason,
            &prompt,
            &message_hash(&message.body),
            self.config.confirmation_ttl_secs,
        )
        .with_followups(followups);

        if let Err(e) = self.storage.upsert_confirmation(&pending).await {
            warn!(error = %e, "failed to persist pending confirmation");
            return GENERIC_FAILURE.to_string();
        }
        prompt
    }

    /// Run the approved decision (or plan) and assemble the reply.
    async fn execute_decision(
        &self,
        message: &InboundMessage,
        scope: &Scope,
        decision: &Decision,
        auth: &gate::Authorization,
    ) -> (String, Option<bool>) {
        let calls: Vec<ToolCall> = match &auth.plan {
            Some(plan) => plan.steps.clone(),
            None => match &decision.body {
                DecisionBody::ToolCalls(calls) => calls.clone(),
                DecisionBody::Text(text) => return (text.clone(), None),
            },
        };

        if calls.is_empty() {
            return (GENERIC_FAILURE.to_string(), None);
        }

        let mut messages = Vec::new();
        let mut all_ok = true;
        for (index, call) in calls.iter().enumerate() {
            let key = format!("{}-{}", message.id, index);
            let result = self.executor.execute(call, scope, &key).await;
            let ok = result.success;
            messages.push(result.message);
            if !ok {
                all_ok = false;
                // A failed step stops the plan; later steps would build on
                // its missing effect.
                break;
            }
        }

        (messages.join("\n"), Some(all_ok))
    }

    async fn continue_confirmation(
        &self,
        pending: PendingConfirmation,
        message: &InboundMessage,
        scope: &Scope,
    ) -> String {
        match resolve_confirmation(pending, message, Utc::now()) {
            ConfirmationOutcome::Approved(pending) => {
                let key = pending.id.to_string();
                let mut result = self.executor.execute(&pending.action, scope, &key).await;
                if result.success {
                    for (index, call) in pending.followups.iter().enumerate() {
                        let step_key = format!("{}-f{}", pending.id, index);
                        let step = self.executor.execute(call, scope, &step_key).await;
                        let ok = step.success;
                        result = merge_results(result, step);
                        if !ok {
                            break;
                        }
                    }
                }
                self.clear_confirmation(scope).await;
                result.message
            }
            ConfirmationOutcome::Denied { reply } | ConfirmationOutcome::Expired { reply } => {
                self.clear_confirmation(scope).await;
                reply
            }
            ConfirmationOutcome::Reprompt { reply } => reply,
        }
    }

    async fn continue_session(
        &self,
        active: SessionRecord,
        message: &InboundMessage,
        scope: &Scope,
    ) -> SessionFollowup {
        if active.is_expired(Utc::now()) {
            self.clear_session(scope).await;
            return SessionFollowup::Fallthrough(None);
        }

        match advance_goal_session(active, message, &self.storage).await {
            SessionStep::Continue { reply, updated } => {
                if let Err(e) = self.storage.upsert_session(&updated).await {
                    warn!(error = %e, "failed to persist session step");
                }
                SessionFollowup::Reply(reply)
            }
            SessionStep::Complete { reply } => {
                self.clear_session(scope).await;
                SessionFollowup::Reply(reply)
            }
            SessionStep::Fallthrough { extra_context } => {
                self.clear_session(scope).await;
                SessionFollowup::Fallthrough(extra_context)
            }
        }
    }

    async fn listening_mode_active(&self, scope: &Scope) -> bool {
        match self.storage.conversation_mode(scope).await {
            Ok(Some((ConversationMode::Listening, until))) => {
                if until > Utc::now() {
                    true
                } else {
                    if let Err(e) = self.storage.clear_conversation_mode(scope).await {
                        warn!(error = %e, "failed to clear expired mode");
                    }
                    false
                }
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "mode lookup failed, assuming normal");
                false
            }
        }
    }

    async fn listening_reply(&self, message: &InboundMessage) -> String {
        let deadline = Duration::from_secs(self.config.handler_timeout_secs);
        match self
            .llm
            .complete_text(LISTENING_SYSTEM, &message.body, deadline)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "listening completion failed, using canned reply");
                LISTENING_FALLBACK.to_string()
            }
        }
    }

    fn capture_feedback(&self, scope: &Scope, message: &InboundMessage) {
        if let Some(polarity) = detect_feedback(&message.body) {
            self.learning.record(LearningEvent::Feedback(FeedbackRecord {
                id: Uuid::new_v4(),
                scope: scope.clone(),
                polarity: polarity.to_string(),
                message_hash: message_hash(&message.body),
                created_at: Utc::now(),
            }));
        }
    }

    fn log_decision(
        &self,
        scope: &Scope,
        message: &InboundMessage,
        decision: &Decision,
        auth: &gate::Authorization,
        success: Option<bool>,
        started: Instant,
    ) {
        let (decision_kind, tool_names) = match &decision.body {
            DecisionBody::ToolCalls(calls) => (
                "tool_calls".to_string(),
                calls.iter().map(|c| c.name.clone()).collect(),
            ),
            DecisionBody::Text(_) => ("text".to_string(), Vec::new()),
        };
        self.learning.record(LearningEvent::Decision(DecisionRecord {
            id: Uuid::new_v4(),
            scope: scope.clone(),
            message_hash: message_hash(&message.body),
            decision_kind,
            tool_names,
            confidence_overall: decision.confidence.overall,
            verdict: auth.verdict.decision.to_string(),
            reason: auth.verdict.reason.as_str().to_string(),
            success,
            latency_ms: started.elapsed().as_millis() as u64,
            rationale: redact(&decision.rationale),
            created_at: Utc::now(),
        }));
    }

    async fn remember_turn(&self, scope: &Scope, role: TurnRole, text: &str) {
        let turn = ConversationTurn {
            role,
            text: text.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.storage.append_turn(scope, &turn).await {
            warn!(error = %e, "failed to append conversation turn");
        }
    }

    async fn read_confirmation(&self, scope: &Scope) -> Option<PendingConfirmation> {
        match self.storage.pending_confirmation(scope).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "confirmation lookup failed, treating as none");
                None
            }
        }
    }

    async fn read_session(&self, scope: &Scope) -> Option<SessionRecord> {
        match self.storage.active_session(scope).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session lookup failed, treating as none");
                None
            }
        }
    }

    async fn clear_confirmation(&self, scope: &Scope) {
        if let Err(e) = self.storage.delete_confirmation(scope).await {
            warn!(error = %e, "failed to delete confirmation");
        }
    }

    async fn clear_session(&self, scope: &Scope) {
        if let Err(e) = self.storage.clear_session(scope).await {
            warn!(error = %e, "failed to clear session");
        }
    }
}

/// What one handled message produced.
#[derive(Debug, Clone)]
pub struct HandleOutcome {
    pub reply: OutboundReply,
    /// The gate's verdict when the general path ran; `None` for
    /// continuation, session, and listening-mode replies.
    pub verdict: Option<VerdictKind>,
}

enum SessionFollowup {
    Reply(String),
    Fallthrough(Option<String>),
}

/// Combine a plan step's result into the running result.
fn merge_results(mut acc: ExecutionResult, step: ExecutionResult) -> ExecutionResult {
    acc.success = acc.success && step.success;
    if !step.message.is_empty() {
        if !acc.message.is_empty() {
            acc.message.push('\n');
        }
        acc.message.push_str(&step.message);
    }
    if acc.error_kind.is_none() {
        acc.error_kind = step.error_kind;
    }
    acc
}
