//! JSON snapshot of a user's data.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::info;

use questlog_store::UserId;

use crate::tool::{ParamExt, Tool, ToolContext, ToolError, ToolOutput, ToolResult};

/// Upper bound on memories exported per snapshot.
const SNAPSHOT_LIMIT: usize = 10_000;

/// Write a backup file of the user's entries, quests and memories.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupSnapshotTool;

fn snapshot_path(dir: PathBuf, user_id: UserId, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "user_{}_{}.json",
        user_id,
        now.format("%Y%m%dT%H%M%SZ")
    ))
}

#[async_trait]
impl Tool for BackupSnapshotTool {
    fn name(&self) -> &str {
        "backup_snapshot"
    }

    fn description(&self) -> &str {
        "Back up the user's data (entries, quests, memories) to a JSON file now."
    }

    fn tags(&self) -> &[&'static str] {
        &["storage", "backup"]
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["backup_now"]}
            },
            "required": ["mode"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        args.one_of("mode", &["backup_now"], Some("backup_now"))?;

        let entries = ctx.store.all_entries(ctx.user_id)?;
        let quests = ctx
            .store
            .quests_since(ctx.user_id, DateTime::<Utc>::UNIX_EPOCH)?;
        let memories = ctx
            .store
            .list_memories(ctx.user_id, None, SNAPSHOT_LIMIT)?;

        let snapshot = json!({
            "user_id": ctx.user_id,
            "exported_at": ctx.now.to_rfc3339(),
            "entries": entries,
            "quests": quests,
            "memories": memories,
        });
        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ToolError::internal(format!("failed to encode snapshot: {}", e)))?;

        let dir = ctx.config.storage().backup_path();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ToolError::upstream(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = snapshot_path(dir, ctx.user_id, ctx.now);
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| ToolError::upstream(format!("cannot write {}: {}", path.display(), e)))?;

        info!(
            user_id = ctx.user_id,
            path = %path.display(),
            bytes = body.len(),
            "Backup written"
        );

        Ok(ToolOutput::new(json!({
            "path": path.display().to_string(),
            "entries": entries.len(),
            "quests": quests.len(),
            "memories": memories.len(),
        }))
        .with_summary(format!(
            "Backup saved to {} ({} entries, {} quests, {} memories)",
            path.display(),
            entries.len(),
            quests.len(),
            memories.len()
        )))
    }
}
