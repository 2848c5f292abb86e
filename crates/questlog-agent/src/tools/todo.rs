//! Daily todo list: add, list, complete and delete planned tasks.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::{Value, json};

use questlog_store::{TodoItem, TodoStatus, format_minutes};

use crate::tool::{
    ParamExt, ParameterValidationError, Tool, ToolContext, ToolError, ToolOutput, ToolResult,
};

const TITLE_MAX_CHARS: usize = 200;
const MAX_DURATION_MINUTES: i64 = 24 * 60;
const ACTIONS: &[&str] = &["add", "list", "done", "delete"];

/// Manage the user's per-day task list.
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoManageTool;

#[async_trait]
impl Tool for TodoManageTool {
    fn name(&self) -> &str {
        "todo_manage"
    }

    fn description(&self) -> &str {
        "Manage the user's daily to-do list. Add a task (one call per task), list the tasks \
         planned for a day, mark a task done, or delete one. Dates are today, tomorrow or \
         YYYY-MM-DD and default to today."
    }

    fn tags(&self) -> &[&'static str] {
        &["todo", "task", "productivity"]
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ACTIONS},
                "title": {"type": "string", "description": "add: what to do"},
                "duration": {"type": "string", "description": "add: planned time, e.g. 45, 30m, 1.5h or 1h20m"},
                "plan_date": {"type": "string", "description": "add/list: today, tomorrow or YYYY-MM-DD"},
                "id": {"type": "integer", "description": "done/delete: task id"}
            },
            "required": ["action"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let action = args
            .one_of("action", ACTIONS, None)?
            .ok_or_else(|| ParameterValidationError::missing("action", "add, list, done or delete"))?;
        match action {
            "add" => add(&args, ctx),
            "list" => list(&args, ctx),
            "done" => done(&args, ctx),
            _ => delete(&args, ctx),
        }
    }
}

fn todo_json(item: &TodoItem) -> Value {
    json!({
        "id": item.id,
        "title": item.title,
        "duration_minutes": item.duration_minutes,
        "status": item.status.as_str(),
        "plan_date": item.plan_date.to_string(),
    })
}

fn plan_date(args: &Value, ctx: &ToolContext) -> Result<NaiveDate, ToolError> {
    let today = ctx.now.date_naive();
    let Some(raw) = args.optional_str("plan_date") else {
        return Ok(today);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "today" => Ok(today),
        "tomorrow" => Ok(today + Duration::days(1)),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d").map_err(|_| {
            ToolError::from(ParameterValidationError::invalid_value(
                "plan_date",
                raw,
                "expected today, tomorrow or YYYY-MM-DD",
            ))
        }),
    }
}

/// Parse `45`, `30m`, `2h`, `1.5h` or `1h20m` into minutes.
fn parse_duration(raw: &str) -> Option<i64> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() || value.contains(char::is_whitespace) {
        return None;
    }
    let minutes = if let Ok(minutes) = value.parse::<i64>() {
        minutes
    } else if let Some((hours, rest)) = value.split_once('h') {
        let hours: f64 = hours.parse().ok()?;
        if !hours.is_finite() || hours < 0.0 {
            return None;
        }
        let rest = rest.strip_suffix('m').unwrap_or(rest);
        let extra = if rest.is_empty() { 0 } else { rest.parse::<i64>().ok()? };
        ((hours * 60.0).round() as i64).saturating_add(extra)
    } else {
        value.strip_suffix('m')?.parse().ok()?
    };
    (minutes > 0).then_some(minutes)
}

fn duration_arg(args: &Value) -> Result<Option<i64>, ToolError> {
    let minutes = match args.get("duration") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(_)) => Some(args.bounded_i64("duration", 0, 1, MAX_DURATION_MINUTES)?),
        Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(None),
        Some(Value::String(raw)) => parse_duration(raw),
        Some(other) => {
            return Err(
                ParameterValidationError::invalid_type("duration", "string", other.to_string())
                    .into(),
            );
        }
    };
    match minutes {
        Some(m) if m <= MAX_DURATION_MINUTES => Ok(Some(m)),
        _ => Err(ParameterValidationError::invalid_value(
            "duration",
            args["duration"].to_string(),
            "expected a positive duration up to 24h, e.g. 45, 30m, 1.5h or 1h20m",
        )
        .into()),
    }
}

fn id_arg(args: &Value, hint: &'static str) -> Result<i64, ToolError> {
    if args.get("id").is_none_or(Value::is_null) {
        return Err(ParameterValidationError::missing("id", hint).into());
    }
    Ok(args.bounded_i64("id", 0, 1, i64::MAX)?)
}

fn add(args: &Value, ctx: &ToolContext) -> ToolResult {
    let title = args.required_str("title", "what the user plans to do")?.trim();
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ParameterValidationError::invalid_value(
            "title",
            title,
            format!("must be at most {} characters", TITLE_MAX_CHARS),
        )
        .into());
    }
    let duration = duration_arg(args)?;
    let date = plan_date(args, ctx)?;

    let item = ctx.store.add_todo(ctx.user_id, date, title, duration, ctx.now)?;
    let planned = duration
        .map(|m| format!(" ({})", format_minutes(m)))
        .unwrap_or_default();
    Ok(ToolOutput::new(json!({
        "added": true,
        "todo": todo_json(&item),
    }))
    .with_summary(format!(
        "Added task #{}: {}{} for {}",
        item.id, item.title, planned, item.plan_date
    )))
}

fn list(args: &Value, ctx: &ToolContext) -> ToolResult {
    let date = plan_date(args, ctx)?;
    let items = ctx.store.list_todos(ctx.user_id, date)?;
    let done = items.iter().filter(|i| i.status == TodoStatus::Done).count();
    let planned: i64 = items.iter().filter_map(|i| i.duration_minutes).sum();

    let summary = if items.is_empty() {
        format!("No tasks for {}", date)
    } else {
        format!("Tasks for {} ({}/{} done)", date, done, items.len())
    };
    Ok(ToolOutput::new(json!({
        "plan_date": date.to_string(),
        "count": items.len(),
        "done": done,
        "planned_minutes": planned,
        "todos": items.iter().map(todo_json).collect::<Vec<_>>(),
    }))
    .with_summary(summary))
}

fn done(args: &Value, ctx: &ToolContext) -> ToolResult {
    let id = id_arg(args, "id of the task to mark done")?;
    let item = ctx
        .store
        .get_todo(ctx.user_id, id)?
        .ok_or_else(|| ToolError::not_found(format!("task #{} not found", id)))?;
    if !ctx.store.complete_todo(ctx.user_id, id, ctx.now)? {
        return Err(ToolError::invalid_args(format!("task #{} is already done", id)));
    }
    Ok(ToolOutput::new(json!({"done": id, "title": item.title}))
        .with_summary(format!("Marked task #{} done", id)))
}

fn delete(args: &Value, ctx: &ToolContext) -> ToolResult {
    let id = id_arg(args, "id of the task to delete")?;
    if !ctx.store.delete_todo(ctx.user_id, id)? {
        return Err(ToolError::not_found(format!("task #{} not found", id)));
    }
    Ok(ToolOutput::new(json!({"deleted": id})).with_summary(format!("Deleted task #{}", id)))
}
