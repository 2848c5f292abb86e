//! Entry points: quota, routing, context and persistence around one loop run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use questlog_config::{LlmConfig, QuestlogConfig};
use questlog_llm::{
    FALLBACK_MODEL, FALLBACK_TIER, Message, ModelCandidate, OpenAiBackend, OpenAiConfig,
    ProviderPool, TierLadder,
};
use questlog_store::{AuditRecord, Store, TurnRole, UserId};

use crate::agent::{AgentLoop, AgentRequest, AgentRunResult, LoopInput, Mode, RunStatus};
use crate::error::{AgentError, Result};
use crate::memory::{ConversationTurn, ConversationWindow};
use crate::prompt::{directive, memory_context, stats_context, system_prompt};
use crate::quota::QuotaGate;
use crate::router::{DEFAULT_TAGS, IntentRouter, RouteDecision};
use crate::tool::{ToolContext, ToolError, ToolOutput, ToolRegistry, run_tool};
use crate::tools::default_registry;

/// Tags every coach run gets on top of the routed ones.
pub const COACH_CORE_TAGS: &[&str] = &[
    "data",
    "stats",
    "history",
    "analytics",
    "insights",
    "memory",
    "coach",
];

/// Characters of each prior turn passed to the model.
pub const HISTORY_TURN_CHARS: usize = 240;

/// Build the tier ladder from configuration.
///
/// No configured tiers means the single built-in free tier.
pub fn build_ladder(config: &LlmConfig) -> Result<TierLadder> {
    let tiers: Vec<(String, String, Vec<ModelCandidate>)> = if config.tiers.is_empty() {
        vec![(
            FALLBACK_TIER.to_string(),
            "Free models".to_string(),
            vec![ModelCandidate::new(FALLBACK_MODEL, "openrouter").with_reasoning(config.reasoning)],
        )]
    } else {
        config
            .tiers
            .iter()
            .map(|tier| {
                let candidates = tier
                    .models
                    .iter()
                    .map(|m| {
                        ModelCandidate::new(&m.id, &m.provider)
                            .with_reasoning(m.reasoning.unwrap_or(config.reasoning))
                    })
                    .collect();
                (tier.name.clone(), tier.description.clone(), candidates)
            })
            .collect()
    };
    Ok(TierLadder::new(tiers, config.default_tier.clone())?)
}

/// One OpenAI-compatible backend per provider that has an API key.
pub fn build_pool(config: &LlmConfig) -> Result<ProviderPool> {
    let mut pool = ProviderPool::new();
    for (name, provider) in &config.providers {
        let Some(key) = provider.resolve_api_key() else {
            tracing::debug!(provider = %name, "No API key; provider skipped");
            continue;
        };
        let backend = OpenAiBackend::new(
            OpenAiConfig::compatible(name, &provider.base_url, Some(key))
                .with_timeout(Duration::from_secs(config.request_timeout_secs)),
        )?;
        pool.insert(name, Arc::new(backend));
    }
    Ok(pool)
}

/// Shared, read-only runtime. One instance serves every user concurrently;
/// all per-request state lives inside [`AgentRuntime::run_agent`].
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    registry: Arc<ToolRegistry>,
    router: Arc<IntentRouter>,
    ladder: Arc<TierLadder>,
    pool: Arc<ProviderPool>,
    store: Arc<Store>,
    config: Arc<QuestlogConfig>,
    gate: QuotaGate,
    agent_loop: AgentLoop,
}

impl AgentRuntime {
    pub fn new(
        config: Arc<QuestlogConfig>,
        store: Arc<Store>,
        registry: ToolRegistry,
        ladder: TierLadder,
        pool: ProviderPool,
    ) -> Result<Self> {
        let pool = Arc::new(pool);
        Ok(Self {
            registry: Arc::new(registry),
            router: Arc::new(IntentRouter::new()?),
            ladder: Arc::new(ladder),
            agent_loop: AgentLoop::from_config(Arc::clone(&pool), &config.agent()),
            gate: QuotaGate::from(&config.quota()),
            pool,
            store,
            config,
        })
    }

    /// Runtime with the built-in tools and backends built from configuration.
    pub fn from_config(config: Arc<QuestlogConfig>, store: Arc<Store>) -> Result<Self> {
        let llm = config.llm();
        let ladder = build_ladder(&llm)?;
        let pool = build_pool(&llm)?;
        tracing::debug!(
            tiers = ladder.tiers().len(),
            default_tier = ladder.default_tier(),
            providers = %pool.providers().join(", "),
            "Runtime configured"
        );
        Self::new(config, store, default_registry()?, ladder, pool)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Arc<QuestlogConfig> {
        &self.config
    }

    pub fn ladder(&self) -> &TierLadder {
        &self.ladder
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Whether any provider has a backend. Without one every run fails.
    pub fn has_providers(&self) -> bool {
        !self.pool.is_empty()
    }

    /// Answer one request.
    ///
    /// `Err` only when the request never reached the loop: the quota gate
    /// refused it, it was cancelled before starting, or the store failed
    /// while preparing it. Every run that starts produces an
    /// [`AgentRunResult`], whatever its status.
    pub async fn run_agent(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult> {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "agent_run",
            %run_id,
            user_id = request.user_id,
            mode = %request.mode
        );
        self.run_inner(request, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let user_id = request.user_id;
        let now = request.requested_at;

        self.admit(user_id, now)?;

        let decision = self.route(&request);
        let system = self.system_text(&request, &decision)?;
        let history = self.history(&request)?;
        let mut tools = self.registry.filter_by_tags(&decision.tags);
        // An unrecognized stateless question never reaches a mutating tool.
        if decision.fallback && decision.skills.is_empty() && request.mode == Mode::Stateless {
            tools = tools.read_only();
        }

        let allow_escalation = request
            .allow_escalation
            .unwrap_or(self.config.llm().allow_escalation);
        let plan = self.ladder.plan(
            request.tier.as_deref(),
            allow_escalation,
            request.preference,
            |provider| self.pool.contains(provider),
        );

        tracing::debug!(
            tags = %decision.tags.join(", "),
            skills = %decision.skill_names().join(", "),
            tools = %tools.names().join(", "),
            candidates = plan.len(),
            history = history.len(),
            "Request prepared"
        );

        let ctx = ToolContext::new(user_id, now, Arc::clone(&self.store), Arc::clone(&self.config))
            .with_cancellation(cancel);
        let result = self
            .agent_loop
            .run(
                LoopInput {
                    request: &request,
                    system,
                    history,
                    tools,
                    plan,
                },
                &ctx,
            )
            .await;

        if request.mode == Mode::Coach {
            self.remember_turns(&request, &result);
        }
        self.audit(&request, &decision, &result);
        Ok(result)
    }

    /// Quota gate and request count, in one store transaction.
    fn admit(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        let admitted = self.store.admit_request(user_id, now, |usage, last| {
            self.gate
                .check(usage, last, now)
                .map_err(|denial| (denial, usage.request_count))
        })?;
        if let Err((denial, requests_today)) = admitted {
            tracing::warn!(
                user_id,
                requests_today,
                reason = %denial,
                "Request refused by quota"
            );
            return Err(AgentError::QuotaExceeded(denial.to_string()));
        }
        Ok(())
    }

    fn route(&self, request: &AgentRequest) -> RouteDecision {
        let mut decision = self.router.resolve(&request.question);
        if decision.tags.is_empty() {
            decision.add_tags(DEFAULT_TAGS);
            decision.fallback = true;
        }
        if request.mode == Mode::Coach {
            decision.add_tags(COACH_CORE_TAGS);
        }
        decision
    }

    fn system_text(&self, request: &AgentRequest, decision: &RouteDecision) -> Result<String> {
        let stats = self
            .store
            .user_stats(request.user_id, request.requested_at)?;
        let mut context = vec![stats_context(&stats, request.requested_at)];
        if request.mode == Mode::Coach {
            let limit = self.config.coach().memory_context_limit;
            let memories = self.store.list_memories(request.user_id, None, limit)?;
            context.extend(memory_context(&memories));
        }
        Ok(system_prompt(&directive(request.mode, decision), &context))
    }

    fn history(&self, request: &AgentRequest) -> Result<Vec<Message>> {
        if request.mode != Mode::Coach {
            return Ok(Vec::new());
        }
        let cap = self.config.coach().history_turns;
        let turns = self.store.recent_turns(request.user_id, cap)?;
        let window =
            ConversationWindow::from_turns(cap, turns.into_iter().map(ConversationTurn::from));
        Ok(window.to_messages(HISTORY_TURN_CHARS))
    }

    /// Append this exchange to stored history. Failures are logged; the
    /// answer is already computed.
    fn remember_turns(&self, request: &AgentRequest, result: &AgentRunResult) {
        if let Err(e) = self.store_turns(request, result) {
            tracing::warn!(user_id = request.user_id, error = %e, "Failed to store conversation turns");
        }
    }

    fn store_turns(&self, request: &AgentRequest, result: &AgentRunResult) -> Result<()> {
        self.store.append_turn(
            request.user_id,
            TurnRole::User,
            &request.question,
            request.requested_at,
        )?;
        if result.status != RunStatus::Failed {
            self.store.append_turn(
                request.user_id,
                TurnRole::Assistant,
                &result.answer,
                Utc::now().max(request.requested_at),
            )?;
        }
        let pruned = self
            .store
            .prune_turns(request.user_id, self.config.coach().history_keep)?;
        if pruned > 0 {
            tracing::debug!(user_id = request.user_id, pruned, "Pruned conversation history");
        }
        Ok(())
    }

    fn audit(&self, request: &AgentRequest, decision: &RouteDecision, result: &AgentRunResult) {
        let record = AuditRecord {
            user_id: request.user_id,
            mode: request.mode.as_str().to_string(),
            question: request.question.clone(),
            tags: decision.tags.clone(),
            skills: decision.skill_names(),
            model: result.model.clone(),
            status: result.status.as_str().to_string(),
            steps: u32::try_from(result.steps.len()).unwrap_or(u32::MAX),
            prompt_tokens: result.prompt_tokens,
            completion_tokens: result.completion_tokens,
            created_at: request.requested_at,
        };
        if let Err(e) = self.store.insert_audit(&record) {
            tracing::warn!(user_id = request.user_id, error = %e, "Failed to write audit record");
        }
    }

    /// Run one registered tool directly, outside any model loop.
    pub async fn invoke_tool(
        &self,
        user_id: UserId,
        name: &str,
        args: Value,
        now: DateTime<Utc>,
    ) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::not_found(format!("unknown tool '{}'", name)))?;
        let ctx = ToolContext::new(user_id, now, Arc::clone(&self.store), Arc::clone(&self.config));
        tracing::debug!(user_id, tool = name, "Direct tool invocation");
        Ok(run_tool(tool.as_ref(), args, &ctx, self.agent_loop.tool_timeout()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questlog_config::{ModelConfig, ProviderConfig, TierConfig};
    use std::collections::BTreeMap;

    fn tier(name: &str, models: &[(&str, &str, Option<bool>)]) -> TierConfig {
        TierConfig {
            name: name.to_string(),
            description: String::new(),
            models: models
                .iter()
                .map(|(id, provider, reasoning)| ModelConfig {
                    id: id.to_string(),
                    provider: provider.to_string(),
                    reasoning: *reasoning,
                })
                .collect(),
        }
    }

    #[test]
    fn test_fallback_ladder() {
        let config = LlmConfig {
            reasoning: false,
            ..LlmConfig::default()
        };
        let ladder = build_ladder(&config).unwrap();
        assert_eq!(ladder.default_tier(), FALLBACK_TIER);
        let candidate = &ladder.tiers()[0].candidates[0];
        assert_eq!(candidate.id, FALLBACK_MODEL);
        assert!(!candidate.reasoning);
    }

    #[test]
    fn test_configured_ladder() {
        let config = LlmConfig {
            default_tier: "cheap".to_string(),
            tiers: vec![
                tier("free", &[("f1", "openrouter", None)]),
                tier("cheap", &[("c1", "openai", Some(false))]),
            ],
            ..LlmConfig::default()
        };
        let ladder = build_ladder(&config).unwrap();
        assert_eq!(ladder.default_tier(), "cheap");
        assert!(ladder.tiers()[0].candidates[0].reasoning);
        assert!(!ladder.tiers()[1].candidates[0].reasoning);
    }

    #[test]
    fn test_empty_tier_rejected() {
        let config = LlmConfig {
            tiers: vec![tier("free", &[])],
            ..LlmConfig::default()
        };
        assert!(matches!(build_ladder(&config), Err(AgentError::Llm(_))));
    }

    #[test]
    fn test_pool_skips_providers_without_keys() {
        let mut providers = BTreeMap::new();
        providers.insert(
            "keyed".to_string(),
            ProviderConfig {
                base_url: "http://localhost:1/v1".to_string(),
                api_key_env: None,
                api_key: Some("sk-test".to_string()),
            },
        );
        providers.insert(
            "keyless".to_string(),
            ProviderConfig {
                base_url: "http://localhost:2/v1".to_string(),
                api_key_env: Some("QUESTLOG_TEST_UNSET_KEY_VAR".to_string()),
                api_key: None,
            },
        );
        let config = LlmConfig {
            providers,
            ..LlmConfig::default()
        };
        let pool = build_pool(&config).unwrap();
        assert!(pool.contains("keyed"));
        assert!(!pool.contains("keyless"));
    }
}
