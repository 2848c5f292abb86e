//! Long-term memory management for coach mode.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use questlog_store::{MemoryCategory, MemoryItem};

use super::date_label;
use crate::context::truncate_chars;
use crate::tool::{
    ParamExt, ParameterValidationError, Tool, ToolContext, ToolError, ToolOutput, ToolResult,
};

/// Longest memory content kept, in characters.
pub const MEMORY_CONTENT_CHARS: usize = 500;

const LIST_LIMIT: usize = 20;
const CATEGORIES: &[&str] = &["preference", "goal", "fact", "context"];

/// Save, list and delete durable facts about the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryManageTool;

#[async_trait]
impl Tool for MemoryManageTool {
    fn name(&self) -> &str {
        "memory_manage"
    }

    fn description(&self) -> &str {
        "Manage long-term memories about the user. Save stable preferences, goals and facts \
         worth remembering across conversations; list what is known; delete outdated items."
    }

    fn tags(&self) -> &[&'static str] {
        &["memory", "coach"]
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["save", "list", "delete"]},
                "category": {"type": "string", "enum": CATEGORIES},
                "content": {"type": "string", "description": "save: the fact to remember"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "id": {"type": "integer", "description": "delete: memory id"}
            },
            "required": ["action"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let action = args
            .one_of("action", &["save", "list", "delete"], None)?
            .ok_or_else(|| ParameterValidationError::missing("action", "save, list or delete"))?;
        match action {
            "save" => save(&args, ctx),
            "list" => list(&args, ctx),
            _ => delete(&args, ctx),
        }
    }
}

fn memory_json(item: &MemoryItem) -> Value {
    json!({
        "id": item.id,
        "category": item.category.as_str(),
        "content": item.content,
        "tags": item.tags,
        "created": date_label(item.created_at),
    })
}

fn category_arg(
    args: &Value,
    default: Option<&'static str>,
) -> Result<Option<MemoryCategory>, ToolError> {
    match args.one_of("category", CATEGORIES, default)? {
        Some(name) => Ok(Some(name.parse()?)),
        None => Ok(None),
    }
}

fn save(args: &Value, ctx: &ToolContext) -> ToolResult {
    let category = category_arg(args, Some("fact"))?.unwrap_or(MemoryCategory::Fact);
    let content = truncate_chars(
        args.required_str("content", "the fact to remember")?.trim(),
        MEMORY_CONTENT_CHARS,
    );
    let tags = args.string_list("tags")?;

    if ctx.store.memory_exists(ctx.user_id, &content)? {
        debug!(user_id = ctx.user_id, "Duplicate memory skipped");
        return Ok(ToolOutput::new(json!({"saved": false, "duplicate": true}))
            .with_summary("Already remembered; nothing saved."));
    }

    let max = ctx.config.coach().max_memories;
    let count = ctx.store.count_memories(ctx.user_id)?;
    if count >= max {
        return Err(ToolError::invalid_args(format!(
            "memory limit reached ({} of {}); delete an outdated memory first",
            count, max
        )));
    }

    let item = ctx
        .store
        .add_memory(ctx.user_id, category, &content, &tags, ctx.now)?;
    Ok(ToolOutput::new(json!({
        "saved": true,
        "memory": memory_json(&item),
    }))
    .with_summary(format!("Saved {} memory #{}", item.category, item.id)))
}

fn list(args: &Value, ctx: &ToolContext) -> ToolResult {
    let category = category_arg(args, None)?;
    let items = ctx.store.list_memories(ctx.user_id, category, LIST_LIMIT)?;
    Ok(ToolOutput::new(json!({
        "count": items.len(),
        "memories": items.iter().map(memory_json).collect::<Vec<_>>(),
    }))
    .with_summary(format!("{} memories", items.len())))
}

fn delete(args: &Value, ctx: &ToolContext) -> ToolResult {
    if args.get("id").is_none_or(Value::is_null) {
        return Err(ParameterValidationError::missing("id", "id of the memory to delete").into());
    }
    let id = args.bounded_i64("id", 0, 1, i64::MAX)?;
    if !ctx.store.delete_memory(ctx.user_id, id)? {
        return Err(ToolError::not_found(format!("memory #{} not found", id)));
    }
    Ok(ToolOutput::new(json!({"deleted": id})).with_summary(format!("Deleted memory #{}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolErrorKind;
    use crate::tools::test_support::{ctx, ctx_with};
    use questlog_config::{CoachConfig, QuestlogConfig};

    #[tokio::test]
    async fn test_save_list_delete() {
        let ctx = ctx();
        let out = MemoryManageTool
            .run(
                json!({"action": "save", "category": "goal", "content": "Run a marathon", "tags": ["fitness", " "]}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("saved"), Some(&json!(true)));
        let id = out.get("memory").unwrap()["id"].as_i64().unwrap();
        assert_eq!(out.get("memory").unwrap()["tags"], json!(["fitness"]));

        let out = MemoryManageTool
            .run(json!({"action": "list", "category": "goal"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("count"), Some(&json!(1)));

        let out = MemoryManageTool
            .run(json!({"action": "list", "category": "fact"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("count"), Some(&json!(0)));

        MemoryManageTool
            .run(json!({"action": "delete", "id": id}), &ctx)
            .await
            .unwrap();
        let err = MemoryManageTool
            .run(json!({"action": "delete", "id": id}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped() {
        let ctx = ctx();
        let save = json!({"action": "save", "content": "Prefers mornings"});
        MemoryManageTool.run(save.clone(), &ctx).await.unwrap();
        let out = MemoryManageTool
            .run(json!({"action": "save", "content": "  PREFERS MORNINGS "}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("duplicate"), Some(&json!(true)));
        assert_eq!(ctx.store.count_memories(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_content_truncated() {
        let ctx = ctx();
        let out = MemoryManageTool
            .run(json!({"action": "save", "content": "x".repeat(900)}), &ctx)
            .await
            .unwrap();
        let content = out.get("memory").unwrap()["content"].as_str().unwrap().to_string();
        assert_eq!(content.chars().count(), MEMORY_CONTENT_CHARS);
    }

    #[tokio::test]
    async fn test_cap_enforced() {
        let config = QuestlogConfig {
            coach: Some(CoachConfig {
                max_memories: 2,
                ..CoachConfig::default()
            }),
            ..QuestlogConfig::default()
        };
        let ctx = ctx_with(config);
        for i in 0..2 {
            MemoryManageTool
                .run(json!({"action": "save", "content": format!("fact {}", i)}), &ctx)
                .await
                .unwrap();
        }
        let err = MemoryManageTool
            .run(json!({"action": "save", "content": "fact 3"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let ctx = ctx();
        for bad in [
            json!({}),
            json!({"action": "forget"}),
            json!({"action": "save"}),
            json!({"action": "save", "content": "x", "category": "secret"}),
            json!({"action": "delete"}),
            json!({"action": "delete", "id": 0}),
        ] {
            let err = MemoryManageTool.run(bad.clone(), &ctx).await.unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::InvalidArgs, "{}", bad);
        }
    }
}
