//! Built-in tools for the agent.
//!
//! - Data queries over logged time (`db_query`)
//! - Derived analytics (`insights`)
//! - Quest creation (`quest_propose`)
//! - Long-term memory management (`memory_manage`)
//! - Daily task lists (`todo_manage`)
//! - Snapshot backups (`backup_snapshot`)
//! - Web search with caching and provider fallback (`web_search`)

mod backup;
mod db_query;
mod insights;
mod memory;
mod quest;
mod search;
mod todo;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::error::Result;
use crate::tool::ToolRegistry;

// Data tools
pub use db_query::DbQueryTool;
pub use insights::InsightsTool;

// Mutating tools
pub use backup::BackupSnapshotTool;
pub use memory::MemoryManageTool;
pub use quest::QuestProposeTool;
pub use todo::TodoManageTool;

// Web search
pub use search::{
    HttpSearchProvider, SearchProvider, SearchResult, WebSearchTool, cache_key, format_results,
};

/// Registry holding every built-in tool in its canonical order.
pub fn default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(DbQueryTool)?;
    registry.register(InsightsTool)?;
    registry.register(QuestProposeTool)?;
    registry.register(MemoryManageTool)?;
    registry.register(BackupSnapshotTool)?;
    registry.register(WebSearchTool::new())?;
    registry.register(TodoManageTool)?;
    Ok(registry)
}

// ─────────────────────────────────────────────────────────────────────────────
// Time helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive upper bound that still includes entries logged at `now`.
pub(crate) fn until(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(1)
}

/// 00:00 UTC on the first day of the month containing `now`.
pub(crate) fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// First day of the month before the one starting at `start`.
pub(crate) fn previous_month_start(start: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if start.month() == 1 {
        (start.year() - 1, 12)
    } else {
        (start.year(), start.month() - 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(start)
}

pub(crate) fn date_label(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use questlog_config::QuestlogConfig;
    use questlog_store::Store;

    use crate::tool::ToolContext;

    /// Thursday 2026-03-12 15:00 UTC.
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 12, 15, 0, 0).unwrap()
    }

    pub fn ctx() -> ToolContext {
        ctx_with(QuestlogConfig::default())
    }

    pub fn ctx_with(config: QuestlogConfig) -> ToolContext {
        ToolContext::new(
            1,
            now(),
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(config),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order_and_tags() {
        let registry = default_registry().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "db_query",
                "insights",
                "quest_propose",
                "memory_manage",
                "backup_snapshot",
                "web_search",
                "todo_manage"
            ]
        );
        let defaults = registry.filter_by_tags(crate::router::DEFAULT_TAGS);
        assert_eq!(defaults.names(), vec!["db_query"]);
        assert!(defaults.iter().all(|t| !t.mutating()));
    }

    #[test]
    fn test_month_helpers() {
        let jan = Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap();
        let start = month_start(jan);
        assert_eq!(date_label(start), "2026-01-01");
        assert_eq!(date_label(previous_month_start(start)), "2025-12-01");
    }
}
