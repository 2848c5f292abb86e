//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [llm]                    # tier ladder defaults
//! [[llm.tiers]]            # one entry per tier, cheapest first
//! [llm.providers.<name>]   # endpoint + key source per provider
//! [agent]                  # step/tool/token ceilings and timeouts
//! [quota]                  # per-user daily limit and cooldown
//! [coach]                  # conversation and memory windows
//! [search]                 # web search providers and cache
//! [storage]                # database and backup locations
//! [logging]                # console/file logging
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Application name for platform directory resolution.
pub(crate) const APP_NAME: &str = "questlog";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// override) can be loaded and merged; accessors return the effective
/// section with defaults applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestlogConfig {
    pub llm: Option<LlmConfig>,
    pub agent: Option<AgentConfig>,
    pub quota: Option<QuotaConfig>,
    pub coach: Option<CoachConfig>,
    pub search: Option<SearchConfig>,
    pub storage: Option<StorageConfig>,
    pub logging: Option<LoggingConfig>,
}

impl QuestlogConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, so a layer that sets `[agent]` must
    /// restate every agent key it cares about.
    pub fn merge(&mut self, other: QuestlogConfig) {
        if other.llm.is_some() {
            self.llm = other.llm;
        }
        if other.agent.is_some() {
            self.agent = other.agent;
        }
        if other.quota.is_some() {
            self.quota = other.quota;
        }
        if other.coach.is_some() {
            self.coach = other.coach;
        }
        if other.search.is_some() {
            self.search = other.search;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective `[llm]` section.
    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    /// Effective `[agent]` section, with every ceiling clamped to its floor.
    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default().clamped()
    }

    /// Effective `[quota]` section.
    pub fn quota(&self) -> QuotaConfig {
        self.quota.clone().unwrap_or_default()
    }

    /// Effective `[coach]` section.
    pub fn coach(&self) -> CoachConfig {
        self.coach.clone().unwrap_or_default()
    }

    /// Effective `[search]` section.
    pub fn search(&self) -> SearchConfig {
        self.search.clone().unwrap_or_default()
    }

    /// Effective `[storage]` section.
    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Effective `[logging]` section.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let llm = self.llm();
        let mut seen = Vec::new();
        for tier in &llm.tiers {
            if tier.name.trim().is_empty() {
                return Err(invalid("llm.tiers.name", "tier name cannot be empty"));
            }
            if seen.contains(&tier.name.as_str()) {
                return Err(invalid(
                    "llm.tiers.name",
                    format!("duplicate tier '{}'", tier.name),
                ));
            }
            seen.push(tier.name.as_str());
            if tier.models.is_empty() {
                return Err(invalid(
                    "llm.tiers.models",
                    format!("tier '{}' has no models", tier.name),
                ));
            }
        }

        for name in &self.search().provider_order {
            if !KNOWN_SEARCH_PROVIDERS.contains(&name.as_str()) {
                return Err(invalid(
                    "search.provider_order",
                    format!("unknown search provider '{}'", name),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM
// ─────────────────────────────────────────────────────────────────────────────

/// Model ladder configuration.
///
/// ```toml
/// [llm]
/// default_tier = "free"
/// allow_escalation = true
///
/// [[llm.tiers]]
/// name = "free"
/// models = [{ id = "arcee-ai/trinity-large-preview:free", provider = "openrouter" }]
///
/// [[llm.tiers]]
/// name = "top"
/// models = [{ id = "anthropic/claude-sonnet-4", provider = "openrouter" }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Tier used when a request names none (or an unknown one).
    pub default_tier: String,
    /// Whether runs may move to higher tiers after exhausting their own.
    pub allow_escalation: bool,
    /// Default for per-model `reasoning`.
    pub reasoning: bool,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Tiers in rank order, cheapest first. Empty means the built-in free tier.
    pub tiers: Vec<TierConfig>,
    /// Provider endpoints keyed by provider name.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openrouter".to_string(),
            ProviderConfig::new("https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
        );
        providers.insert(
            "openai".to_string(),
            ProviderConfig::new("https://api.openai.com/v1", "OPENAI_API_KEY"),
        );
        providers.insert(
            "google".to_string(),
            ProviderConfig::new(
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "GEMINI_API_KEY",
            ),
        );

        Self {
            default_tier: "free".to_string(),
            allow_escalation: true,
            reasoning: true,
            request_timeout_secs: 45,
            tiers: Vec::new(),
            providers,
        }
    }
}

/// One tier of the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub models: Vec<ModelConfig>,
}

/// One candidate model within a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Overrides `llm.reasoning` for this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<bool>,
}

fn default_provider() -> String {
    "openrouter".to_string()
}

/// An OpenAI-compatible endpoint and where its key comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Plaintext key. Loading warns when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    fn new(base_url: &str, env: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key_env: Some(env.to_string()),
            api_key: None,
        }
    }

    /// Resolve the API key: environment variable first, then plaintext.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key_env.as_deref(), self.api_key.as_deref())
    }
}

fn resolve_key(env: Option<&str>, plaintext: Option<&str>) -> Option<String> {
    if let Some(var) = env
        && let Ok(value) = std::env::var(var)
        && !value.trim().is_empty()
    {
        return Some(value);
    }
    plaintext
        .filter(|k| !k.trim().is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// Ceilings and timeouts for one agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub max_tool_calls: u32,
    pub max_step_prompt_tokens: u32,
    pub max_step_completion_tokens: u32,
    pub max_total_tokens: u32,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Tool exchanges kept in the transcript.
    pub max_observations: usize,
    /// Characters of each tool observation passed back to the model.
    pub observation_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 6,
            max_tool_calls: 4,
            max_step_prompt_tokens: 1800,
            max_step_completion_tokens: 420,
            max_total_tokens: 6000,
            model_timeout_secs: 45,
            tool_timeout_secs: 20,
            max_observations: 6,
            observation_chars: 1200,
        }
    }
}

impl AgentConfig {
    /// Raise every value to its floor.
    pub fn clamped(self) -> Self {
        Self {
            max_steps: self.max_steps.max(1),
            max_tool_calls: self.max_tool_calls,
            max_step_prompt_tokens: self.max_step_prompt_tokens.max(100),
            max_step_completion_tokens: self.max_step_completion_tokens.max(64),
            max_total_tokens: self.max_total_tokens.max(512),
            model_timeout_secs: self.model_timeout_secs.max(1),
            tool_timeout_secs: self.tool_timeout_secs.max(1),
            max_observations: self.max_observations.max(1),
            observation_chars: self.observation_chars.max(80),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Quota / Coach
// ─────────────────────────────────────────────────────────────────────────────

/// Per-user request limits. Zero disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub cooldown_seconds: u64,
}

/// Coach-mode conversation and memory windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Turns passed to the model as prior conversation.
    pub history_turns: usize,
    /// Turns kept in storage per user.
    pub history_keep: usize,
    /// Memories injected into the directive.
    pub memory_context_limit: usize,
    /// Memories a user may hold.
    pub max_memories: usize,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            history_turns: 8,
            history_keep: 20,
            memory_context_limit: 15,
            max_memories: 30,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// Search providers the web search tool knows how to call.
pub const KNOWN_SEARCH_PROVIDERS: &[&str] = &["brave", "tavily", "serper"];

/// Web search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Providers tried in order until one returns results.
    pub provider_order: Vec<String>,
    /// Key sources and switches per provider.
    pub providers: BTreeMap<String, SearchProviderConfig>,
    pub cache_ttl_seconds: u64,
    pub default_results: u32,
    pub max_results: u32,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let providers = [
            ("brave", "BRAVE_SEARCH_API_KEY"),
            ("tavily", "TAVILY_API_KEY"),
            ("serper", "SERPER_API_KEY"),
        ]
        .into_iter()
        .map(|(name, env)| {
            (
                name.to_string(),
                SearchProviderConfig {
                    enabled: true,
                    api_key_env: Some(env.to_string()),
                    api_key: None,
                },
            )
        })
        .collect();

        Self {
            provider_order: KNOWN_SEARCH_PROVIDERS.iter().map(|s| s.to_string()).collect(),
            providers,
            cache_ttl_seconds: 21_600,
            default_results: 5,
            max_results: 8,
            timeout_secs: 20,
        }
    }
}

/// One search provider's switch and key source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl SearchProviderConfig {
    /// Resolve the API key: environment variable first, then plaintext.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key_env.as_deref(), self.api_key.as_deref())
    }
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage / Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Where data lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Database path, defaulting to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| data_dir().join("questlog.db"))
    }

    /// Backup directory, defaulting to `backups/` under the data directory.
    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("backups"))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Console output as JSON.
    pub json: bool,
    /// Also write JSON logs to a daily rolling file.
    pub file: bool,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: false,
            dir: None,
        }
    }
}

impl LoggingConfig {
    /// Log directory, defaulting to `logs/` under the data directory.
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| data_dir().join("logs"))
    }
}

/// Platform data directory for questlog (`~/.local/share/questlog` on Linux).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
