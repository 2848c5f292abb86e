//! Read-only queries over a user's logged time, quests and economy.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Value, json};

use questlog_store::{
    Category, Entry, EntryKind, MILESTONE_BLOCK_MINUTES, format_minutes, week_start,
};

use super::{date_label, month_start, previous_month_start, until};
use crate::tool::{ParamExt, ParameterValidationError, Tool, ToolContext, ToolOutput, ToolResult};

const ACTIONS: &[&str] = &[
    "weekly_breakdown",
    "category_trend",
    "recent_entries",
    "quest_history",
    "economy_breakdown",
    "note_keyword_sum",
];

const CATEGORIES: &[&str] = &["study", "build", "training", "job"];

// ─────────────────────────────────────────────────────────────────────────────
// Db Query Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Structured queries over the tracker database.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbQueryTool;

#[async_trait]
impl Tool for DbQueryTool {
    fn name(&self) -> &str {
        "db_query"
    }

    fn description(&self) -> &str {
        "Query the user's logged history and stats. Pick an action: weekly_breakdown, \
         category_trend, recent_entries, quest_history, economy_breakdown, note_keyword_sum. \
         Use note_keyword_sum for totals by note text (e.g. 'anime', 'youtube')."
    }

    fn tags(&self) -> &[&'static str] {
        &["data", "stats", "history"]
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ACTIONS},
                "weeks_back": {"type": "integer", "minimum": 1, "maximum": 8, "description": "weekly_breakdown: weeks to include (default 4)"},
                "category": {"type": "string", "enum": CATEGORIES, "description": "category_trend: category to compare"},
                "period": {"type": "string", "description": "category_trend: week|month. note_keyword_sum: all|week|month|last_7d|last_30d"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50, "description": "recent_entries: how many (default 10)"},
                "days": {"type": "integer", "minimum": 7, "maximum": 365, "description": "quest_history: look-back window (default 30)"},
                "query": {"type": "string", "description": "note_keyword_sum: text to find in entry notes"},
                "kind": {"type": "string", "enum": ["spend", "productive", "all"], "description": "note_keyword_sum: entry kind (default spend)"}
            },
            "required": ["action"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let action = args
            .one_of("action", ACTIONS, None)?
            .ok_or_else(|| ParameterValidationError::missing("action", "one of the listed actions"))?;

        match action {
            "weekly_breakdown" => weekly_breakdown(&args, ctx),
            "category_trend" => category_trend(&args, ctx),
            "recent_entries" => recent_entries(&args, ctx),
            "quest_history" => quest_history(&args, ctx),
            "economy_breakdown" => economy_breakdown(ctx),
            _ => note_keyword_sum(&args, ctx),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────────────────────────────────────

fn entry_json(entry: &Entry) -> Value {
    json!({
        "id": entry.id,
        "at": entry.created_at.format("%Y-%m-%d %H:%M").to_string(),
        "kind": entry.kind.as_str(),
        "category": entry.category.map(|c| c.as_str()),
        "minutes": entry.minutes,
        "xp": entry.xp,
        "fun_earned": entry.fun_earned,
        "note": entry.note,
    })
}

fn weekly_breakdown(args: &Value, ctx: &ToolContext) -> ToolResult {
    let weeks = args.bounded_i64("weeks_back", 4, 1, 8)?;
    let this_week = week_start(ctx.now);

    let mut rows = Vec::new();
    let mut lines = vec![format!("Weekly breakdown ({} weeks, newest first):", weeks)];
    for i in 0..weeks {
        let start = this_week - Duration::days(7 * i);
        let end = if i == 0 {
            until(ctx.now)
        } else {
            start + Duration::days(7)
        };
        let (mut productive, mut spent, mut xp) = (0, 0, 0);
        for entry in ctx.store.entries_between(ctx.user_id, start, end)? {
            match entry.kind {
                EntryKind::Productive => {
                    productive += entry.minutes;
                    xp += entry.xp;
                }
                EntryKind::Spend => spent += entry.minutes,
            }
        }
        lines.push(format!(
            "- week of {}: productive {}, spent {}, XP {}",
            date_label(start),
            format_minutes(productive),
            format_minutes(spent),
            xp
        ));
        rows.push(json!({
            "week_start": date_label(start),
            "productive_minutes": productive,
            "spent_minutes": spent,
            "xp": xp,
        }));
    }

    Ok(ToolOutput::new(json!({
        "action": "weekly_breakdown",
        "weeks": rows,
    }))
    .with_summary(lines.join("\n")))
}

fn category_trend(args: &Value, ctx: &ToolContext) -> ToolResult {
    let category: Category = args
        .one_of("category", CATEGORIES, Some("build"))?
        .unwrap_or("build")
        .parse()?;
    let period = args
        .one_of("period", &["week", "month"], Some("month"))?
        .unwrap_or("month");

    let (current_start, previous_start) = if period == "week" {
        let start = week_start(ctx.now);
        (start, start - Duration::days(7))
    } else {
        let start = month_start(ctx.now);
        (start, previous_month_start(start))
    };

    let minutes_in = |start, end| -> Result<i64, questlog_store::StoreError> {
        Ok(ctx
            .store
            .entries_between(ctx.user_id, start, end)?
            .iter()
            .filter(|e| e.category == Some(category))
            .map(|e| e.minutes)
            .sum())
    };
    let current = minutes_in(current_start, until(ctx.now))?;
    let previous = minutes_in(previous_start, current_start)?;
    let delta = current - previous;
    let direction = match delta.signum() {
        1 => "up",
        -1 => "down",
        _ => "flat",
    };
    let percent = (previous > 0).then(|| (delta as f64 / previous as f64) * 100.0);
    let percent_text = percent
        .map(|p| format!("{:+.1}%", p))
        .unwrap_or_else(|| "n/a (no baseline)".to_string());

    Ok(ToolOutput::new(json!({
        "action": "category_trend",
        "category": category.as_str(),
        "period": period,
        "current_minutes": current,
        "previous_minutes": previous,
        "delta_minutes": delta,
        "percent_change": percent,
        "direction": direction,
    }))
    .with_summary(format!(
        "{} this {}: {} vs {} previous ({}, {})",
        category,
        period,
        format_minutes(current),
        format_minutes(previous),
        percent_text,
        direction
    )))
}

fn recent_entries(args: &Value, ctx: &ToolContext) -> ToolResult {
    let limit = args.bounded_i64("limit", 10, 1, 50)?;
    let entries = ctx.store.recent_entries(ctx.user_id, limit as usize)?;
    let summary = if entries.is_empty() {
        "No entries found.".to_string()
    } else {
        format!("{} most recent entries, newest first", entries.len())
    };
    Ok(ToolOutput::new(json!({
        "action": "recent_entries",
        "count": entries.len(),
        "entries": entries.iter().map(entry_json).collect::<Vec<_>>(),
    }))
    .with_summary(summary))
}

fn quest_history(args: &Value, ctx: &ToolContext) -> ToolResult {
    let days = args.bounded_i64("days", 30, 7, 365)?;
    let since = ctx.now - Duration::days(days);
    let quests = ctx.store.quests_since(ctx.user_id, since)?;
    let active = ctx.store.active_quests(ctx.user_id)?;

    let rows: Vec<Value> = quests
        .iter()
        .map(|q| {
            json!({
                "id": q.id,
                "title": q.title,
                "status": q.status.as_str(),
                "difficulty": q.difficulty.as_str(),
                "condition": q.condition.describe(),
                "reward_fun_minutes": q.reward_fun_minutes,
                "created": date_label(q.created_at),
                "expires": date_label(q.expires_at),
                "completed": q.completed_at.map(date_label),
            })
        })
        .collect();

    Ok(ToolOutput::new(json!({
        "action": "quest_history",
        "days": days,
        "active_now": active.len(),
        "quests": rows,
    }))
    .with_summary(format!(
        "{} quests in the last {} days, {} active now",
        quests.len(),
        days,
        active.len()
    )))
}

fn economy_breakdown(ctx: &ToolContext) -> ToolResult {
    let stats = ctx.store.user_stats(ctx.user_id, ctx.now)?;
    let productive_all = ctx
        .store
        .sum_minutes(ctx.user_id, EntryKind::Productive, None)?;
    let to_next_block = MILESTONE_BLOCK_MINUTES - productive_all.rem_euclid(MILESTONE_BLOCK_MINUTES);
    let eco = &stats.economy;

    Ok(ToolOutput::new(json!({
        "action": "economy_breakdown",
        "productive_minutes_all_time": productive_all,
        "base_fun_minutes": eco.base_fun_minutes,
        "milestone_bonus_minutes": eco.milestone_bonus_minutes,
        "quest_bonus_minutes": eco.quest_bonus_minutes,
        "earned_fun_minutes": eco.earned_fun_minutes,
        "spent_fun_minutes": eco.spent_fun_minutes,
        "remaining_fun_minutes": eco.remaining_fun_minutes,
        "minutes_to_next_milestone": to_next_block,
        "level": stats.level.level,
        "title": stats.level.title,
        "xp_total": stats.level.total_xp,
        "streak_days": stats.streak_days,
    }))
    .with_summary(format!(
        "Fun earned {}, spent {}, remaining {}",
        format_minutes(eco.earned_fun_minutes),
        format_minutes(eco.spent_fun_minutes),
        format_minutes(eco.remaining_fun_minutes)
    )))
}

fn note_keyword_sum(args: &Value, ctx: &ToolContext) -> ToolResult {
    let query = args.required_str("query", "text to look for in entry notes, e.g. 'anime'")?;
    let kind = args
        .one_of("kind", &["spend", "productive", "all"], Some("spend"))?
        .unwrap_or("spend");
    let period = args
        .one_of(
            "period",
            &["all", "week", "month", "last_7d", "last_30d"],
            Some("all"),
        )?
        .unwrap_or("all");

    let end = until(ctx.now);
    let entries = match period {
        "week" => ctx.store.entries_between(ctx.user_id, week_start(ctx.now), end)?,
        "month" => ctx.store.entries_between(ctx.user_id, month_start(ctx.now), end)?,
        "last_7d" => {
            ctx.store
                .entries_between(ctx.user_id, ctx.now - Duration::days(7), end)?
        }
        "last_30d" => {
            ctx.store
                .entries_between(ctx.user_id, ctx.now - Duration::days(30), end)?
        }
        _ => ctx.store.all_entries(ctx.user_id)?,
    };

    let needle = query.trim().to_lowercase();
    let matches: Vec<&Entry> = entries
        .iter()
        .filter(|e| kind == "all" || e.kind.as_str() == kind)
        .filter(|e| {
            e.note
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle))
        })
        .collect();
    let total: i64 = matches.iter().map(|e| e.minutes).sum();
    let examples: Vec<Value> = matches.iter().rev().take(5).map(|e| entry_json(e)).collect();

    Ok(ToolOutput::new(json!({
        "action": "note_keyword_sum",
        "query": query,
        "kind": kind,
        "period": period,
        "total_minutes": total,
        "match_count": matches.len(),
        "recent_matches": examples,
    }))
    .with_summary(format!(
        "'{}' ({}, {}): {} across {} entries",
        query,
        kind,
        period,
        format_minutes(total),
        matches.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolErrorKind;
    use crate::tools::test_support::{ctx, now};
    use questlog_store::NewEntry;

    fn seed(ctx: &ToolContext) {
        let store = &ctx.store;
        let now = now();
        store
            .add_entry(NewEntry::productive(1, Category::Build, 90, now - Duration::hours(3)))
            .unwrap();
        store
            .add_entry(NewEntry::productive(1, Category::Build, 60, now - Duration::days(7)))
            .unwrap();
        store
            .add_entry(NewEntry::spend(1, 45, now - Duration::hours(1)).with_note("Anime night"))
            .unwrap();
        store
            .add_entry(NewEntry::spend(1, 30, now - Duration::days(20)).with_note("anime"))
            .unwrap();
        // Another user's data must never show up.
        store
            .add_entry(NewEntry::spend(2, 500, now - Duration::hours(1)).with_note("anime"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_missing_action() {
        let ctx = ctx();
        let err = DbQueryTool.run(json!({"action": "drop_tables"}), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
        let err = DbQueryTool.run(json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[tokio::test]
    async fn test_weekly_breakdown() {
        let ctx = ctx();
        seed(&ctx);
        let out = DbQueryTool
            .run(json!({"action": "weekly_breakdown", "weeks_back": 2}), &ctx)
            .await
            .unwrap();
        let weeks = out.get("weeks").unwrap().as_array().unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0]["week_start"], "2026-03-09");
        assert_eq!(weeks[0]["productive_minutes"], 90);
        assert_eq!(weeks[0]["spent_minutes"], 45);
        assert_eq!(weeks[1]["productive_minutes"], 60);
    }

    #[tokio::test]
    async fn test_weekly_breakdown_range_checked() {
        let err = DbQueryTool
            .run(json!({"action": "weekly_breakdown", "weeks_back": 30}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[tokio::test]
    async fn test_category_trend_week() {
        let ctx = ctx();
        seed(&ctx);
        let out = DbQueryTool
            .run(
                json!({"action": "category_trend", "category": "build", "period": "week"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("current_minutes"), Some(&json!(90)));
        assert_eq!(out.get("previous_minutes"), Some(&json!(60)));
        assert_eq!(out.get("direction"), Some(&json!("up")));
        assert_eq!(out.get("percent_change"), Some(&json!(50.0)));
    }

    #[tokio::test]
    async fn test_note_keyword_sum() {
        let ctx = ctx();
        seed(&ctx);
        let out = DbQueryTool
            .run(json!({"action": "note_keyword_sum", "query": "ANIME"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("total_minutes"), Some(&json!(75)));
        assert_eq!(out.get("match_count"), Some(&json!(2)));

        let out = DbQueryTool
            .run(
                json!({"action": "note_keyword_sum", "query": "anime", "period": "last_7d"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("total_minutes"), Some(&json!(45)));

        let err = DbQueryTool
            .run(json!({"action": "note_keyword_sum"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[tokio::test]
    async fn test_recent_entries_and_economy() {
        let ctx = ctx();
        seed(&ctx);
        let out = DbQueryTool
            .run(json!({"action": "recent_entries", "limit": 2}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("count"), Some(&json!(2)));

        let out = DbQueryTool
            .run(json!({"action": "economy_breakdown"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.get("spent_fun_minutes"), Some(&json!(75)));
        assert_eq!(out.get("productive_minutes_all_time"), Some(&json!(150)));
        assert_eq!(out.get("minutes_to_next_milestone"), Some(&json!(450)));
    }

    #[tokio::test]
    async fn test_quest_history_empty() {
        let out = DbQueryTool
            .run(json!({"action": "quest_history"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.get("active_now"), Some(&json!(0)));
        assert_eq!(out.get("days"), Some(&json!(30)));
    }
}
