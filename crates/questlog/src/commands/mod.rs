//! CLI command handlers.

pub mod ask;
pub mod config;
pub mod entries;
pub mod memory;
pub mod quests;
pub mod todo;
pub mod tools;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use questlog_agent::AgentRuntime;
use questlog_config::{ConfigSource, QuestlogConfig};
use questlog_store::{Store, UserId};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: Arc<QuestlogConfig>,
    /// Config layers that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// User the command acts as.
    pub user_id: UserId,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the configured database.
    pub fn open_store(&self) -> Result<Arc<Store>> {
        let path = self.config.storage().database_path();
        let store = Store::open(&path)
            .with_context(|| format!("cannot open database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Runtime over the configured database and providers.
    pub fn runtime(&self) -> Result<AgentRuntime> {
        let store = self.open_store()?;
        AgentRuntime::from_config(Arc::clone(&self.config), store)
            .context("failed to set up the agent runtime")
    }
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
