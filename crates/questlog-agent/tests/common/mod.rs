//! Common utilities for runtime integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};

use questlog_agent::{AgentRuntime, ToolRegistry, default_registry};
use questlog_config::{AgentConfig, CoachConfig, QuestlogConfig, QuotaConfig};
use questlog_llm::{MockBackend, ModelCandidate, ProviderPool, TierLadder};
use questlog_store::Store;

/// Thursday 2026-03-12 15:00 UTC.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 12, 15, 0, 0).unwrap()
}

pub fn later(seconds: i64) -> DateTime<Utc> {
    now() + Duration::seconds(seconds)
}

/// Two tiers: `free` (model `free-1` on provider `free`) and `cheap`
/// (model `cheap-1` on provider `cheap`).
pub fn ladder() -> TierLadder {
    TierLadder::new(
        vec![
            (
                "free".to_string(),
                "Free models".to_string(),
                vec![ModelCandidate::new("free-1", "free")],
            ),
            (
                "cheap".to_string(),
                "Cheap models".to_string(),
                vec![ModelCandidate::new("cheap-1", "cheap")],
            ),
        ],
        "free",
    )
    .unwrap()
}

/// Builder for a runtime over mock providers and an in-memory store.
pub struct TestRuntime {
    config: QuestlogConfig,
    pool: ProviderPool,
    registry: Option<ToolRegistry>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self {
            config: QuestlogConfig::default(),
            pool: ProviderPool::new(),
            registry: None,
        }
    }

    pub fn with_provider(mut self, name: &str, backend: Arc<MockBackend>) -> Self {
        self.pool.insert(name, backend);
        self
    }

    pub fn with_quota(mut self, daily_limit: u32, cooldown_seconds: u64) -> Self {
        self.config.quota = Some(QuotaConfig {
            daily_limit,
            cooldown_seconds,
        });
        self
    }

    pub fn with_coach(mut self, coach: CoachConfig) -> Self {
        self.config.coach = Some(coach);
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.config.agent = Some(agent);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<AgentRuntime> {
        let store = Arc::new(Store::open_in_memory()?);
        let registry = match self.registry {
            Some(registry) => registry,
            None => default_registry()?,
        };
        Ok(AgentRuntime::new(
            Arc::new(self.config),
            store,
            registry,
            ladder(),
            self.pool,
        )?)
    }
}

/// Serialized messages of a recorded request, for substring checks.
pub fn messages_json(backend: &MockBackend, index: usize) -> String {
    serde_json::to_string(&backend.requests()[index].messages).unwrap()
}
