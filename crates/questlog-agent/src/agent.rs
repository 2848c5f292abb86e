//! The bounded step loop.
//!
//! One run alternates model calls and tool dispatch until the model answers,
//! a ceiling is reached, every model candidate has failed, or the run is
//! cancelled:
//!
//! ```text
//! START ─▶ MODEL_CALL ─▶ answer ──────────────────────▶ DONE (ok)
//!              ▲   │
//!              │   └─▶ tool calls ─▶ TOOL_DISPATCH ─┐
//!              └────────────────────────────────────┘
//!
//! before each MODEL_CALL: cancelled?       ─▶ FAILED
//!                         ceiling reached? ─▶ BUDGET_EXCEEDED (partial / failed)
//! inside MODEL_CALL:      plan exhausted?  ─▶ FAILED
//! ```
//!
//! A failed model call never ends the run by itself. The [`Escalator`] moves
//! to the next candidate (same tier first, then higher tiers) and the call is
//! repeated. The cursor is held for the whole run, so a later step starts on
//! the candidate that last succeeded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use questlog_config::AgentConfig;
use questlog_llm::{
    CompletionRequest, CompletionResponse, EscalationAttempt, Escalator, LlmError, Message,
    PlannedModel, ProviderPool, ToolDefinition, ToolResultBlock, ToolUseBlock, VendorPreference,
};
use questlog_store::UserId;

use crate::budget::{Budget, BudgetLimit, BudgetLimits};
use crate::context::{Transcript, estimate_tokens_from_chars, truncate_chars};
use crate::error::AgentError;
use crate::prompt::{BUDGET_EXHAUSTED, CANCELLED, PARTIAL_NOTE, PROVIDERS_UNAVAILABLE};
use crate::tool::{ToolContext, ToolError, ToolResult, ToolSet, run_tool};

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Which entry point a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One-shot analytics question.
    Stateless,
    /// Coaching conversation with history and memories.
    Coach,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::Coach => "coach",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user question, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub user_id: UserId,
    pub question: String,
    pub mode: Mode,
    /// Tier to start from. `None` or an unknown name uses the default tier.
    pub tier: Option<String>,
    /// Overrides `llm.allow_escalation` for this request.
    pub allow_escalation: Option<bool>,
    pub preference: Option<VendorPreference>,
    pub requested_at: DateTime<Utc>,
}

impl AgentRequest {
    pub fn new(
        user_id: UserId,
        question: impl Into<String>,
        mode: Mode,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            question: question.into(),
            mode,
            tier: None,
            allow_escalation: None,
            preference: None,
            requested_at,
        }
    }

    pub fn stateless(user_id: UserId, question: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(user_id, question, Mode::Stateless, at)
    }

    pub fn coach(user_id: UserId, question: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(user_id, question, Mode::Coach, at)
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_escalation(mut self, allow: bool) -> Self {
        self.allow_escalation = Some(allow);
        self
    }

    pub fn with_preference(mut self, preference: VendorPreference) -> Self {
        self.preference = Some(preference);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result
// ─────────────────────────────────────────────────────────────────────────────

/// What a step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    FinalAnswer,
    ToolCalls,
    /// No candidate produced a usable response.
    Failed,
}

/// One loop iteration. Never changed after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the run.
    pub index: u32,
    /// Model that served the step, or the last one tried when it failed.
    pub model: String,
    pub tier: String,
    pub outcome: StepOutcome,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Tool calls requested by the model, in order.
    pub tools: Vec<String>,
    /// Failed attempts before the model above was used.
    pub escalations: Vec<EscalationAttempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answered,
    StepCeiling,
    TokenBudget,
    StepPromptTooLarge,
    ProvidersExhausted,
    Cancelled,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::StepCeiling => "step_ceiling",
            Self::TokenBudget => "token_budget",
            Self::StepPromptTooLarge => "step_prompt_too_large",
            Self::ProvidersExhausted => "providers_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<BudgetLimit> for Termination {
    fn from(limit: BudgetLimit) -> Self {
        match limit {
            BudgetLimit::Steps => Self::StepCeiling,
            BudgetLimit::StepPrompt => Self::StepPromptTooLarge,
            BudgetLimit::TotalTokens | BudgetLimit::ToolCalls => Self::TokenBudget,
        }
    }
}

/// Outcome of one run, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub answer: String,
    /// Model that produced the last usable response.
    pub model: Option<String>,
    pub steps: Vec<StepRecord>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_calls: u32,
    pub status: RunStatus,
    pub termination: Termination,
}

impl AgentRunResult {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a run needs besides the tool context.
#[derive(Debug)]
pub struct LoopInput<'a> {
    pub request: &'a AgentRequest,
    /// Directive plus context blocks.
    pub system: String,
    /// Prior conversation, oldest first.
    pub history: Vec<Message>,
    /// Tools the model may call in this run.
    pub tools: ToolSet,
    /// Candidates in escalation order.
    pub plan: Vec<PlannedModel>,
}

/// Mutable state of one run.
struct RunState {
    budget: Budget,
    steps: Vec<StepRecord>,
    last_text: Option<String>,
    model: Option<String>,
    /// Call signature to the id of the call that ran it.
    executed: HashMap<String, String>,
}

impl RunState {
    fn push_step(&mut self, mut record: StepRecord) {
        record.index = u32::try_from(self.steps.len() + 1).unwrap_or(u32::MAX);
        self.steps.push(record);
    }
}

/// Drives one request from question to [`AgentRunResult`].
///
/// The loop itself holds only configuration; every run owns its own budget,
/// transcript and escalation cursor, so one `AgentLoop` serves concurrent
/// requests.
#[derive(Debug, Clone)]
pub struct AgentLoop {
    pool: Arc<ProviderPool>,
    limits: BudgetLimits,
    model_timeout: Duration,
    tool_timeout: Duration,
    max_observations: usize,
    observation_chars: usize,
}

impl AgentLoop {
    pub fn new(pool: Arc<ProviderPool>, limits: BudgetLimits) -> Self {
        Self::from_config(pool, &AgentConfig::default()).with_limits(limits)
    }

    /// Limits, timeouts and observation windows from configuration.
    pub fn from_config(pool: Arc<ProviderPool>, config: &AgentConfig) -> Self {
        let config = config.clone().clamped();
        Self {
            pool,
            limits: BudgetLimits::from(&config),
            model_timeout: Duration::from_secs(config.model_timeout_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            max_observations: config.max_observations,
            observation_chars: config.observation_chars,
        }
    }

    pub fn with_limits(mut self, limits: BudgetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_observations(mut self, max: usize) -> Self {
        self.max_observations = max.max(1);
        self
    }

    pub fn with_observation_chars(mut self, chars: usize) -> Self {
        self.observation_chars = chars.max(1);
        self
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Run the step loop to completion.
    pub async fn run(&self, input: LoopInput<'_>, ctx: &ToolContext) -> AgentRunResult {
        let LoopInput {
            request,
            system,
            history,
            tools,
            plan,
        } = input;

        let mut escalator = Escalator::new(plan);
        let mut transcript = Transcript::new(system, request.question.clone())
            .with_history(history)
            .with_max_exchanges(self.max_observations);
        let mut state = RunState {
            budget: Budget::new(self.limits),
            steps: Vec::new(),
            last_text: None,
            model: None,
            executed: HashMap::new(),
        };

        tracing::info!(
            user_id = request.user_id,
            mode = %request.mode,
            tools = tools.len(),
            candidates = escalator.len(),
            question_len = request.question.len(),
            "Run started"
        );

        loop {
            if ctx.is_cancelled() {
                return self.finish(state, Termination::Cancelled, request.user_id);
            }
            if let Err(AgentError::BudgetExceeded(limit)) = state.budget.check_step() {
                tracing::warn!(
                    user_id = request.user_id,
                    steps = state.budget.steps(),
                    tokens = state.budget.total_tokens(),
                    %limit,
                    "Budget exhausted"
                );
                return self.finish(state, limit.into(), request.user_id);
            }

            // Past the tool ceiling the model is only offered the chance to answer.
            let offered = if state.budget.tools_available() {
                tools.definitions()
            } else {
                Vec::new()
            };
            let (estimate, _) = transcript.fit(state.budget.prompt_cap(), &offered);
            if let Err(AgentError::BudgetExceeded(limit)) = state.budget.check_prompt(estimate) {
                tracing::warn!(
                    user_id = request.user_id,
                    estimate,
                    cap = state.budget.prompt_cap(),
                    "Prompt does not fit the per-step cap"
                );
                return self.finish(state, limit.into(), request.user_id);
            }
            let max_tokens = state.budget.completion_allowance();

            let mut attempts: Vec<EscalationAttempt> = Vec::new();
            let (planned, response) = loop {
                if ctx.is_cancelled() {
                    self.record_failed_step(&mut state, attempts);
                    return self.finish(state, Termination::Cancelled, request.user_id);
                }
                let Some(planned) = escalator.current().cloned() else {
                    tracing::warn!(
                        user_id = request.user_id,
                        attempts = attempts.len(),
                        "Every model candidate failed"
                    );
                    self.record_failed_step(&mut state, attempts);
                    return self.finish(state, Termination::ProvidersExhausted, request.user_id);
                };

                tracing::debug!(
                    user_id = request.user_id,
                    step = state.budget.steps() + 1,
                    model = %planned.candidate.id,
                    tier = %planned.tier,
                    messages = transcript.messages().len(),
                    tools = offered.len(),
                    estimated_tokens = estimate,
                    max_tokens,
                    "Calling model"
                );

                match self
                    .call_model(&planned, &transcript, &offered, max_tokens)
                    .await
                {
                    Ok(response) => break (planned, response),
                    Err(err) => {
                        tracing::warn!(
                            user_id = request.user_id,
                            model = %planned.candidate.id,
                            tier = %planned.tier,
                            failure = %err.failure_kind(),
                            error = %err,
                            "Model call failed"
                        );
                        attempts.push(EscalationAttempt {
                            model: planned.candidate.id.clone(),
                            tier: planned.tier.clone(),
                            failure: err.failure_kind(),
                            message: err.to_string(),
                        });
                        if let Some(next) = escalator.advance()
                            && next.rank > planned.rank
                        {
                            tracing::info!(
                                user_id = request.user_id,
                                from = %planned.tier,
                                to = %next.tier,
                                "Escalating to a higher tier"
                            );
                        }
                    }
                }
            };

            let (prompt_tokens, completion_tokens) = usage_or_estimate(&response, estimate);
            state.budget.record_step(prompt_tokens, completion_tokens);
            ctx.publish_budget(state.budget.snapshot());
            state.model = Some(planned.candidate.id.clone());

            let text = response.text();
            if !text.trim().is_empty() {
                state.last_text = Some(text.trim().to_string());
            }

            if response.has_tool_use() {
                let calls = response.tool_uses();
                tracing::debug!(
                    user_id = request.user_id,
                    step = state.budget.steps(),
                    model = %planned.candidate.id,
                    tools = %calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
                    "Dispatching tool calls"
                );
                let results = self
                    .dispatch(&calls, &tools, &transcript, &mut state, ctx)
                    .await;
                transcript.push_exchange(response.content.clone(), results);
                ctx.publish_budget(state.budget.snapshot());

                state.push_step(StepRecord {
                    index: 0,
                    model: planned.candidate.id,
                    tier: planned.tier,
                    outcome: StepOutcome::ToolCalls,
                    prompt_tokens,
                    completion_tokens,
                    tools: calls.into_iter().map(|c| c.name).collect(),
                    escalations: attempts,
                });
                continue;
            }

            state.push_step(StepRecord {
                index: 0,
                model: planned.candidate.id,
                tier: planned.tier,
                outcome: StepOutcome::FinalAnswer,
                prompt_tokens,
                completion_tokens,
                tools: Vec::new(),
                escalations: attempts,
            });
            return self.finish(state, Termination::Answered, request.user_id);
        }
    }

    /// One model call against one candidate.
    ///
    /// A missing backend, a timeout and an unusable response are all errors,
    /// so the caller treats every one of them as a reason to escalate.
    async fn call_model(
        &self,
        planned: &PlannedModel,
        transcript: &Transcript,
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> std::result::Result<CompletionResponse, LlmError> {
        let backend = self.pool.get(&planned.candidate.provider).ok_or_else(|| {
            LlmError::Config(format!(
                "no backend configured for provider '{}'",
                planned.candidate.provider
            ))
        })?;

        let request =
            CompletionRequest::new(&planned.candidate.id, transcript.messages(), max_tokens)
                .with_system(transcript.system())
                .with_tools(tools.to_vec())
                .with_reasoning(planned.candidate.reasoning);

        let response = tokio::time::timeout(self.model_timeout, backend.complete(request))
            .await
            .map_err(|_| {
                LlmError::Network(format!(
                    "model call timed out after {}s",
                    self.model_timeout.as_secs()
                ))
            })??;
        response.validate()?;
        Ok(response)
    }

    /// Run the requested tool calls in order, one at a time.
    async fn dispatch(
        &self,
        calls: &[ToolUseBlock],
        tools: &ToolSet,
        transcript: &Transcript,
        state: &mut RunState,
        ctx: &ToolContext,
    ) -> Vec<ToolResultBlock> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let block = match self.invoke(call, calls, tools, transcript, state, ctx).await {
                Ok(output) => {
                    tracing::debug!(tool = %call.name, tool_call_id = %call.id, "Tool completed");
                    ToolResultBlock::success(
                        &call.id,
                        truncate_chars(&output.to_observation(), self.observation_chars),
                    )
                }
                Err(err) => {
                    tracing::warn!(
                        tool = %call.name,
                        tool_call_id = %call.id,
                        kind = %err.kind,
                        error = %err.message,
                        "Tool call failed"
                    );
                    ToolResultBlock::error(
                        &call.id,
                        truncate_chars(&err.to_observation(), self.observation_chars),
                    )
                }
            };
            results.push(block);
        }
        results
    }

    /// Claim budget, resolve and run one call. Every rejection is an
    /// `invalid_args` observation the model can react to.
    ///
    /// A repeated call is refused only while the model can still see the
    /// earlier result, either in the transcript or in the same batch.
    async fn invoke(
        &self,
        call: &ToolUseBlock,
        batch: &[ToolUseBlock],
        tools: &ToolSet,
        transcript: &Transcript,
        state: &mut RunState,
        ctx: &ToolContext,
    ) -> ToolResult {
        if state.budget.claim_tool_call().is_err() {
            return Err(ToolError::invalid_args(
                "tool budget exhausted; answer with the information you already have",
            ));
        }
        let Some(tool) = tools.get(&call.name) else {
            return Err(ToolError::invalid_args(format!(
                "unknown tool '{}'; available tools: {}",
                call.name,
                tools.names().join(", ")
            )));
        };
        // serde_json objects serialize with sorted keys, so this is canonical.
        let signature = format!("{}:{}", call.name, call.input);
        if let Some(earlier) = state.executed.get(&signature) {
            let visible =
                transcript.holds_call(earlier) || batch.iter().any(|c| &c.id == earlier);
            if visible {
                return Err(ToolError::invalid_args(format!(
                    "'{}' was already called with these arguments; reuse the earlier result",
                    call.name
                )));
            }
            tracing::debug!(
                tool = %call.name,
                tool_call_id = %call.id,
                earlier_call_id = %earlier,
                "Earlier result no longer in context; running again"
            );
        }
        state.executed.insert(signature, call.id.clone());

        tracing::debug!(
            tool = %call.name,
            tool_call_id = %call.id,
            input_bytes = call.input.to_string().len(),
            "Tool: executing"
        );
        run_tool(tool.as_ref(), call.input.clone(), ctx, self.tool_timeout).await
    }

    /// Record a step in which no candidate answered.
    fn record_failed_step(&self, state: &mut RunState, attempts: Vec<EscalationAttempt>) {
        let Some(last) = attempts.last() else {
            return;
        };
        let (model, tier) = (last.model.clone(), last.tier.clone());
        state.budget.record_step(0, 0);
        state.push_step(StepRecord {
            index: 0,
            model,
            tier,
            outcome: StepOutcome::Failed,
            prompt_tokens: 0,
            completion_tokens: 0,
            tools: Vec::new(),
            escalations: attempts,
        });
    }

    fn finish(&self, state: RunState, termination: Termination, user_id: UserId) -> AgentRunResult {
        let (status, answer) = match termination {
            Termination::Answered => (RunStatus::Ok, state.last_text.unwrap_or_default()),
            Termination::ProvidersExhausted => {
                (RunStatus::Failed, PROVIDERS_UNAVAILABLE.to_string())
            }
            Termination::Cancelled => (RunStatus::Failed, CANCELLED.to_string()),
            Termination::StepCeiling
            | Termination::TokenBudget
            | Termination::StepPromptTooLarge => match state.last_text {
                Some(text) => (RunStatus::Partial, format!("{}{}", text, PARTIAL_NOTE)),
                None => (RunStatus::Failed, BUDGET_EXHAUSTED.to_string()),
            },
        };

        tracing::info!(
            user_id,
            status = %status,
            termination = termination.as_str(),
            steps = state.steps.len(),
            tool_calls = state.budget.tool_calls(),
            prompt_tokens = state.budget.prompt_tokens(),
            completion_tokens = state.budget.completion_tokens(),
            model = state.model.as_deref().unwrap_or("none"),
            "Run finished"
        );

        AgentRunResult {
            answer,
            model: state.model,
            prompt_tokens: state.budget.prompt_tokens(),
            completion_tokens: state.budget.completion_tokens(),
            tool_calls: state.budget.tool_calls(),
            steps: state.steps,
            status,
            termination,
        }
    }
}

/// Provider-reported usage, falling back to estimates when it is zero.
fn usage_or_estimate(response: &CompletionResponse, prompt_estimate: u32) -> (u32, u32) {
    let prompt = if response.usage.input_tokens > 0 {
        response.usage.input_tokens
    } else {
        prompt_estimate
    };
    let completion = if response.usage.output_tokens > 0 {
        response.usage.output_tokens
    } else {
        let chars = response.text().chars().count()
            + response
                .tool_uses()
                .iter()
                .map(|c| c.name.chars().count() + c.input.to_string().chars().count())
                .sum::<usize>();
        estimate_tokens_from_chars(chars)
    };
    (prompt, completion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolErrorKind, ToolOutput, ToolRegistry};
    use crate::tools::test_support::{ctx, now};
    use async_trait::async_trait;
    use questlog_llm::{
        ContentBlock, ModelCandidate, MockBackend, StopReason, Usage, mock_text_response,
        mock_tool_use_response,
    };
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "Counts its invocations"
        }
        fn tags(&self) -> &[&'static str] {
            &["data"]
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"n": {"type": "integer"}}})
        }
        async fn run(&self, _args: Value, _ctx: &ToolContext) -> crate::tool::ToolResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ToolOutput::new(json!({"calls": n})).with_summary("counted"))
        }
    }

    fn tool_set(calls: &Arc<AtomicUsize>) -> ToolSet {
        let mut registry = ToolRegistry::new();
        registry
            .register(CountingTool {
                calls: Arc::clone(calls),
            })
            .unwrap();
        registry.filter_by_tags(&["data"])
    }

    fn planned(tier: &str, rank: usize, model: &str, provider: &str) -> PlannedModel {
        PlannedModel {
            tier: tier.to_string(),
            rank,
            candidate: ModelCandidate::new(model, provider),
        }
    }

    fn request() -> AgentRequest {
        AgentRequest::stateless(1, "How much did I study?", now())
    }

    fn tool_call_with_text(text: &str, id: &str) -> CompletionResponse {
        CompletionResponse::new(
            "msg",
            "mock-model",
            vec![
                ContentBlock::text(text),
                ContentBlock::tool_use(id, "count", json!({"n": id})),
            ],
            StopReason::ToolUse,
            Usage::new(10, 20),
        )
    }

    async fn run_with(
        agent: &AgentLoop,
        tools: ToolSet,
        plan: Vec<PlannedModel>,
        ctx: &ToolContext,
    ) -> AgentRunResult {
        let request = request();
        agent
            .run(
                LoopInput {
                    request: &request,
                    system: "Be brief.".to_string(),
                    history: Vec::new(),
                    tools,
                    plan,
                },
                ctx,
            )
            .await
    }

    fn single(backend: MockBackend) -> (Arc<MockBackend>, AgentLoop, Vec<PlannedModel>) {
        let backend = Arc::new(backend);
        let pool = ProviderPool::new().with_backend("p", backend.clone());
        let agent = AgentLoop::new(Arc::new(pool), BudgetLimits::default());
        (backend, agent, vec![planned("free", 0, "model-a", "p")])
    }

    #[tokio::test]
    async fn test_final_answer_in_one_step() {
        let (backend, agent, plan) = single(MockBackend::with_text("You studied 3h."));
        let result = run_with(&agent, ToolSet::default(), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.termination, Termination::Answered);
        assert_eq!(result.answer, "You studied 3h.");
        assert_eq!(result.model.as_deref(), Some("model-a"));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].outcome, StepOutcome::FinalAnswer);
        assert_eq!(result.prompt_tokens, 10);
        assert_eq!(result.completion_tokens, 20);

        let sent = &backend.requests()[0];
        assert_eq!(sent.model, "model-a");
        assert_eq!(sent.system.as_deref(), Some("Be brief."));
        assert_eq!(sent.max_tokens, 420);
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!({}))]),
            mock_text_response("Done."),
        ]));
        let ctx = ctx();
        let result = run_with(&agent, tool_set(&calls), plan, &ctx).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.steps[0].tools, vec!["count"]);
        assert_eq!(result.steps[1].index, 2);
        assert_eq!(ctx.budget().tool_calls_used, 1);

        let second = &backend.requests()[1];
        assert_eq!(second.messages.len(), 3);
        let observation = serde_json::to_string(&second.messages[2]).unwrap();
        assert!(observation.contains("counted"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "delete_everything", json!({}))]),
            mock_text_response("I can't do that."),
        ]));
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let observation = serde_json::to_string(&backend.requests()[1].messages[2]).unwrap();
        assert!(observation.contains("invalid_args"));
        assert!(observation.contains("unknown tool 'delete_everything'"));
        assert!(observation.contains("available tools: count"));
    }

    #[tokio::test]
    async fn test_tool_ceiling_omits_tools_and_rejects_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![
                ("c1", "count", json!({"n": 1})),
                ("c2", "count", json!({"n": 2})),
            ]),
            mock_tool_use_response(vec![("c3", "count", json!({"n": 3}))]),
            mock_text_response("Answer without more tools."),
        ]));
        let agent = agent.with_limits(BudgetLimits {
            max_tool_calls: 1,
            ..BudgetLimits::default()
        });
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.tool_calls, 1);

        let requests = backend.requests();
        assert!(!requests[0].tools.is_empty());
        assert!(requests[1].tools.is_empty());
        assert!(requests[2].tools.is_empty());
        let observation = serde_json::to_string(&requests[1].messages[2]).unwrap();
        assert!(observation.contains("tool budget exhausted"));
    }

    #[tokio::test]
    async fn test_duplicate_call_not_reexecuted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!({"n": 1}))]),
            mock_tool_use_response(vec![("c2", "count", json!({"n": 1}))]),
            mock_text_response("Done."),
        ]));
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.tool_calls, 2);
        let observation = serde_json::to_string(&backend.requests()[2].messages[4]).unwrap();
        assert!(observation.contains("already called"));
    }

    #[tokio::test]
    async fn test_duplicate_in_same_batch_not_reexecuted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![
                ("c1", "count", json!({"n": 1})),
                ("c2", "count", json!({"n": 1})),
            ]),
            mock_text_response("Done."),
        ]));
        let agent = agent.with_max_observations(1);
        run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_runs_again_once_result_is_evicted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!({"n": 1}))]),
            mock_tool_use_response(vec![("c2", "count", json!({"n": 2}))]),
            mock_tool_use_response(vec![("c3", "count", json!({"n": 1}))]),
            mock_text_response("Done."),
        ]));
        let agent = agent.with_max_observations(1);
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let last = serde_json::to_string(&backend.requests()[3].messages).unwrap();
        assert!(!last.contains("already called"));
        assert!(last.contains("c3"));
        assert!(!last.contains("c1"));
    }

    #[tokio::test]
    async fn test_step_ceiling_with_text_is_partial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_, agent, plan) = single(MockBackend::new(vec![
            tool_call_with_text("Checking the first week", "a"),
            tool_call_with_text("Checking the second week", "b"),
        ]));
        let agent = agent.with_limits(BudgetLimits {
            max_steps: 2,
            ..BudgetLimits::default()
        });
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Partial);
        assert_eq!(result.termination, Termination::StepCeiling);
        assert_eq!(result.steps.len(), 2);
        assert!(result.answer.starts_with("Checking the second week"));
        assert!(result.answer.ends_with(PARTIAL_NOTE));
    }

    #[tokio::test]
    async fn test_step_ceiling_without_text_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!({"n": 1}))]),
            mock_tool_use_response(vec![("c2", "count", json!({"n": 2}))]),
        ]));
        let agent = agent.with_limits(BudgetLimits {
            max_steps: 2,
            ..BudgetLimits::default()
        });
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.termination, Termination::StepCeiling);
        assert_eq!(result.answer, BUDGET_EXHAUSTED);
    }

    #[tokio::test]
    async fn test_total_token_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            tool_call_with_text("First look", "a"),
            tool_call_with_text("Second look", "b"),
            mock_text_response("never reached"),
        ]));
        // 30 tokens per step: 70 left after one step, 40 after two.
        let agent = agent.with_limits(BudgetLimits {
            max_total_tokens: 100,
            ..BudgetLimits::default()
        });
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Partial);
        assert_eq!(result.termination, Termination::TokenBudget);
        assert_eq!(backend.request_count(), 2);
        assert_eq!(backend.requests()[1].max_tokens, 70);
        assert!(result.answer.starts_with("Second look"));
        assert_eq!(result.total_tokens(), 60);
    }

    #[tokio::test]
    async fn test_prompt_too_large_makes_no_call() {
        let (backend, agent, plan) = single(MockBackend::with_text("unused"));
        let agent = agent.with_limits(BudgetLimits {
            max_step_prompt_tokens: 2,
            ..BudgetLimits::default()
        });
        let result = run_with(&agent, ToolSet::default(), plan, &ctx()).await;

        assert_eq!(result.termination, Termination::StepPromptTooLarge);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(backend.request_count(), 0);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_escalates_within_and_across_tiers() {
        let failing = Arc::new(MockBackend::failing());
        let good = Arc::new(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!({}))]),
            mock_text_response("Escalated answer"),
        ]));
        let pool = ProviderPool::new()
            .with_backend("down", failing.clone())
            .with_backend("up", good.clone());
        let agent = AgentLoop::new(Arc::new(pool), BudgetLimits::default());
        let plan = vec![
            planned("free", 0, "free-1", "down"),
            planned("free", 0, "free-2", "down"),
            planned("cheap", 1, "cheap-1", "up"),
            planned("top", 2, "top-1", "down"),
        ];
        let calls = Arc::new(AtomicUsize::new(0));
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.model.as_deref(), Some("cheap-1"));
        let first = &result.steps[0];
        assert_eq!(first.tier, "cheap");
        let failed: Vec<_> = first.escalations.iter().map(|a| a.model.as_str()).collect();
        assert_eq!(failed, vec!["free-1", "free-2"]);
        // The second step starts on the candidate that succeeded.
        assert!(result.steps[1].escalations.is_empty());
        assert_eq!(failing.requested_models(), vec!["free-1", "free-2"]);
        assert_eq!(good.request_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_escalates() {
        let empty = Arc::new(MockBackend::new(vec![mock_text_response("   ")]));
        let good = Arc::new(MockBackend::with_text("Real answer"));
        let pool = ProviderPool::new()
            .with_backend("a", empty)
            .with_backend("b", good);
        let agent = AgentLoop::new(Arc::new(pool), BudgetLimits::default());
        let plan = vec![planned("free", 0, "m1", "a"), planned("free", 0, "m2", "b")];
        let result = run_with(&agent, ToolSet::default(), plan, &ctx()).await;

        assert_eq!(result.answer, "Real answer");
        assert_eq!(
            result.steps[0].escalations[0].failure,
            questlog_llm::FailureKind::Malformed
        );
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let pool = ProviderPool::new().with_backend("down", Arc::new(MockBackend::failing()));
        let agent = AgentLoop::new(Arc::new(pool), BudgetLimits::default());
        let plan = vec![
            planned("free", 0, "m1", "down"),
            planned("top", 1, "m2", "missing-provider"),
        ];
        let result = run_with(&agent, ToolSet::default(), plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.termination, Termination::ProvidersExhausted);
        assert_eq!(result.answer, PROVIDERS_UNAVAILABLE);
        assert_eq!(result.model, None);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].outcome, StepOutcome::Failed);
        assert_eq!(result.steps[0].escalations.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_plan_fails_without_steps() {
        let agent = AgentLoop::new(Arc::new(ProviderPool::new()), BudgetLimits::default());
        let result = run_with(&agent, ToolSet::default(), Vec::new(), &ctx()).await;
        assert_eq!(result.termination, Termination::ProvidersExhausted);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_model_timeout_is_transport_failure() {
        let slow = Arc::new(
            MockBackend::with_text("too late").with_delay(Duration::from_millis(500)),
        );
        let fast = Arc::new(MockBackend::with_text("on time"));
        let pool = ProviderPool::new()
            .with_backend("slow", slow)
            .with_backend("fast", fast);
        let agent = AgentLoop::new(Arc::new(pool), BudgetLimits::default())
            .with_model_timeout(Duration::from_millis(20));
        let plan = vec![planned("free", 0, "s", "slow"), planned("free", 0, "f", "fast")];
        let result = run_with(&agent, ToolSet::default(), plan, &ctx()).await;

        assert_eq!(result.answer, "on time");
        assert_eq!(
            result.steps[0].escalations[0].failure,
            questlog_llm::FailureKind::Transport
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let (backend, agent, plan) = single(MockBackend::with_text("unused"));
        let ctx = ctx();
        ctx.cancellation.cancel();
        let result = run_with(&agent, ToolSet::default(), plan, &ctx).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.answer, CANCELLED);
        assert_eq!(backend.request_count(), 0);
    }

    struct CancellingTool;

    #[async_trait]
    impl Tool for CancellingTool {
        fn name(&self) -> &str {
            "stop"
        }
        fn description(&self) -> &str {
            "Cancels the run it is part of"
        }
        fn tags(&self) -> &[&'static str] {
            &["data"]
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn run(&self, _args: Value, ctx: &ToolContext) -> crate::tool::ToolResult {
            ctx.cancellation.cancel();
            Ok(ToolOutput::new(json!({"stopped": true})))
        }
    }

    #[tokio::test]
    async fn test_cancelled_between_steps() {
        let (backend, agent, plan) = single(MockBackend::new(vec![
            CompletionResponse::new(
                "msg",
                "mock-model",
                vec![
                    ContentBlock::text("Looking at your week"),
                    ContentBlock::tool_use("c1", "stop", json!({})),
                ],
                StopReason::ToolUse,
                Usage::new(10, 20),
            ),
            mock_text_response("never reached"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(CancellingTool).unwrap();
        let tools = registry.filter_by_tags(&["data"]);

        let result = run_with(&agent, tools, plan, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.answer, CANCELLED);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_errors_do_not_end_the_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (backend, agent, plan) = single(MockBackend::new(vec![
            mock_tool_use_response(vec![("c1", "count", json!("not an object"))]),
            mock_text_response("Recovered."),
        ]));
        let result = run_with(&agent, tool_set(&calls), plan, &ctx()).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let observation = serde_json::to_string(&backend.requests()[1].messages[2]).unwrap();
        assert!(observation.contains(ToolErrorKind::InvalidArgs.as_str()));
    }

    #[test]
    fn test_usage_falls_back_to_estimate() {
        let response = CompletionResponse::new(
            "m",
            "x",
            vec![ContentBlock::text("a".repeat(40))],
            StopReason::EndTurn,
            Usage::default(),
        );
        assert_eq!(usage_or_estimate(&response, 77), (77, 10));
        let reported = mock_text_response("hi");
        assert_eq!(usage_or_estimate(&reported, 77), (10, 20));
    }

    #[test]
    fn test_termination_from_budget_limit() {
        assert_eq!(Termination::from(BudgetLimit::Steps), Termination::StepCeiling);
        assert_eq!(Termination::from(BudgetLimit::TotalTokens), Termination::TokenBudget);
        assert_eq!(
            Termination::from(BudgetLimit::StepPrompt),
            Termination::StepPromptTooLarge
        );
    }
}
