//! Derived analytics: consistency, weekly patterns, velocity, streak risk
//! and economy health.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, Duration, Timelike, Weekday};
use serde_json::{Map, Value, json};

use questlog_store::{Category, EntryKind, day_start, format_minutes, week_start};

use super::until;
use crate::tool::{ParamExt, Tool, ToolContext, ToolOutput, ToolResult};

const FOCUS: &[&str] = &["consistency", "patterns", "velocity", "streak", "economy"];

const CONSISTENCY_DAYS: i64 = 30;
const PATTERN_DAYS: i64 = 84;
const ECONOMY_DAYS: i64 = 14;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Read-only analytics over the user's logged time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsightsTool;

#[async_trait]
impl Tool for InsightsTool {
    fn name(&self) -> &str {
        "insights"
    }

    fn description(&self) -> &str {
        "Analyze the user's habits: consistency over 30 days, weekday and time-of-day \
         patterns, week-over-week velocity, streak risk today, and fun economy health. \
         Omit focus to get every section."
    }

    fn tags(&self) -> &[&'static str] {
        &["analytics", "insights"]
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "focus": {"type": "string", "enum": FOCUS},
                "target_minutes": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 720,
                    "description": "Daily productive target (default 120)"
                }
            }
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let focus = args.one_of("focus", FOCUS, None)?;
        let target = args.bounded_i64("target_minutes", 120, 1, 720)?;
        let wanted = |name: &str| focus.is_none_or(|f| f == name);

        let mut payload = Map::new();
        let mut lines = Vec::new();
        if wanted("consistency") {
            let (section, line) = consistency(ctx, target)?;
            payload.insert("consistency".into(), section);
            lines.push(line);
        }
        if wanted("patterns") {
            let (section, line) = patterns(ctx)?;
            payload.insert("patterns".into(), section);
            lines.push(line);
        }
        if wanted("velocity") {
            let (section, line) = velocity(ctx)?;
            payload.insert("velocity".into(), section);
            lines.push(line);
        }
        if wanted("streak") {
            let (section, line) = streak(ctx, target)?;
            payload.insert("streak".into(), section);
            lines.push(line);
        }
        if wanted("economy") {
            let (section, line) = economy(ctx)?;
            payload.insert("economy".into(), section);
            lines.push(line);
        }

        Ok(ToolOutput::new(Value::Object(payload)).with_summary(lines.join("\n")))
    }
}

type Section = Result<(Value, String), questlog_store::StoreError>;

fn consistency(ctx: &ToolContext, target: i64) -> Section {
    let today = day_start(ctx.now);
    let start = today - Duration::days(CONSISTENCY_DAYS - 1);
    let days = ctx
        .store
        .daily_productive_minutes(ctx.user_id, start, until(ctx.now))?;

    let active = days.values().filter(|m| **m > 0).count();
    let hits = days.values().filter(|m| **m >= target).count();
    let score = hits as f64 / CONSISTENCY_DAYS as f64 * 100.0;

    Ok((
        json!({
            "days": CONSISTENCY_DAYS,
            "active_days": active,
            "target_hit_days": hits,
            "target_minutes": target,
            "score_percent": (score * 10.0).round() / 10.0,
        }),
        format!(
            "Consistency: target hit on {}/{} days ({:.0}%), active on {}",
            hits, CONSISTENCY_DAYS, score, active
        ),
    ))
}

fn daypart(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=17 => "afternoon",
        18..=23 => "evening",
        _ => "night",
    }
}

fn patterns(ctx: &ToolContext) -> Section {
    let start = day_start(ctx.now) - Duration::days(PATTERN_DAYS - 1);
    let entries = ctx.store.entries_between(ctx.user_id, start, until(ctx.now))?;

    let mut weekdays: BTreeMap<u32, i64> = BTreeMap::new();
    let mut dayparts: BTreeMap<&'static str, i64> = ["morning", "afternoon", "evening", "night"]
        .into_iter()
        .map(|p| (p, 0))
        .collect();
    for entry in entries.iter().filter(|e| e.kind == EntryKind::Productive) {
        *weekdays
            .entry(entry.created_at.weekday().num_days_from_monday())
            .or_insert(0) += entry.minutes;
        *dayparts.entry(daypart(entry.created_at.hour())).or_insert(0) += entry.minutes;
    }

    let weekday_totals: Map<String, Value> = WEEKDAYS
        .iter()
        .map(|d| {
            let minutes = weekdays.get(&d.num_days_from_monday()).copied().unwrap_or(0);
            (d.to_string(), json!(minutes))
        })
        .collect();
    // Earliest weekday wins ties.
    let best = WEEKDAYS
        .iter()
        .map(|d| (*d, weekdays.get(&d.num_days_from_monday()).copied().unwrap_or(0)))
        .filter(|(_, m)| *m > 0)
        .fold(None, |best: Option<(Weekday, i64)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        });
    let best_daypart = dayparts
        .iter()
        .filter(|(_, m)| **m > 0)
        .max_by_key(|(_, m)| **m)
        .map(|(p, _)| *p);

    let line = match best {
        Some((day, minutes)) => format!(
            "Patterns (12 weeks): best weekday {} ({}), strongest time {}",
            day,
            format_minutes(minutes),
            best_daypart.unwrap_or("none")
        ),
        None => "Patterns (12 weeks): no productive time logged".to_string(),
    };

    Ok((
        json!({
            "days": PATTERN_DAYS,
            "weekday_minutes": weekday_totals,
            "daypart_minutes": dayparts,
            "best_weekday": best.map(|(d, _)| d.to_string()),
            "best_daypart": best_daypart,
        }),
        line,
    ))
}

fn velocity(ctx: &ToolContext) -> Section {
    let this_week = week_start(ctx.now);
    let last_week = this_week - Duration::days(7);
    let current = ctx.store.entries_between(ctx.user_id, this_week, until(ctx.now))?;
    let previous = ctx.store.entries_between(ctx.user_id, last_week, this_week)?;

    let mut by_category = Map::new();
    for category in Category::ALL {
        let sum = |entries: &[questlog_store::Entry]| -> i64 {
            entries
                .iter()
                .filter(|e| e.category == Some(category))
                .map(|e| e.minutes)
                .sum()
        };
        let (now, before) = (sum(&current), sum(&previous));
        by_category.insert(
            category.as_str().to_string(),
            json!({"this_week": now, "last_week": before, "delta": now - before}),
        );
    }

    let productive = |entries: &[questlog_store::Entry]| -> i64 {
        entries
            .iter()
            .filter(|e| e.kind == EntryKind::Productive)
            .map(|e| e.minutes)
            .sum()
    };
    let (this_total, last_total) = (productive(&current), productive(&previous));
    let percent = (last_total > 0)
        .then(|| ((this_total - last_total) as f64 / last_total as f64 * 1000.0).round() / 10.0);

    Ok((
        json!({
            "this_week_minutes": this_total,
            "last_week_minutes": last_total,
            "percent_change": percent,
            "categories": by_category,
        }),
        format!(
            "Velocity: {} this week vs {} last week ({})",
            format_minutes(this_total),
            format_minutes(last_total),
            percent
                .map(|p| format!("{:+.1}%", p))
                .unwrap_or_else(|| "no baseline".to_string())
        ),
    ))
}

fn streak(ctx: &ToolContext, target: i64) -> Section {
    let streak = ctx.store.streak_days(ctx.user_id, ctx.now)?;
    let today = ctx
        .store
        .daily_productive_minutes(ctx.user_id, day_start(ctx.now), until(ctx.now))?
        .values()
        .sum::<i64>();
    let missing = (target - today).max(0);
    let hour = ctx.now.hour();
    let risk = if missing == 0 {
        "low"
    } else if hour >= 21 {
        "high"
    } else if hour >= 18 {
        "medium"
    } else {
        "low"
    };

    Ok((
        json!({
            "current_streak_days": streak,
            "today_minutes": today,
            "target_minutes": target,
            "missing_minutes": missing,
            "risk": risk,
        }),
        format!(
            "Streak: {} days, today {} of {} ({} risk)",
            streak,
            format_minutes(today),
            format_minutes(target),
            risk
        ),
    ))
}

/// Health label for fun earned vs spent over a window.
pub(crate) fn economy_health(earned: i64, spent: i64) -> &'static str {
    if spent <= 0 {
        return if earned > 0 { "healthy" } else { "idle" };
    }
    let ratio = earned as f64 / spent as f64;
    if ratio >= 1.5 {
        "healthy"
    } else if ratio >= 1.0 {
        "balanced"
    } else {
        "overspending"
    }
}

fn economy(ctx: &ToolContext) -> Section {
    let start = day_start(ctx.now) - Duration::days(ECONOMY_DAYS - 1);
    let entries = ctx.store.entries_between(ctx.user_id, start, until(ctx.now))?;
    let (mut earned, mut spent) = (0, 0);
    for entry in &entries {
        match entry.kind {
            EntryKind::Productive => earned += entry.fun_earned,
            EntryKind::Spend => spent += entry.minutes,
        }
    }
    let health = economy_health(earned, spent);

    Ok((
        json!({
            "days": ECONOMY_DAYS,
            "fun_earned": earned,
            "fun_spent": spent,
            "net": earned - spent,
            "health": health,
        }),
        format!(
            "Economy (14 days): earned {}, spent {} ({})",
            format_minutes(earned),
            format_minutes(spent),
            health
        ),
    ))
}
