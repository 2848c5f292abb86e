//! Quest proposal: the model suggests a time-bound challenge and the tool
//! validates and stores it.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Value, json};

use questlog_store::{Category, Difficulty, NewQuest, QuestCondition, format_minutes};

use super::date_label;
use crate::tool::{
    ParamExt, ParameterValidationError, Tool, ToolContext, ToolError, ToolOutput, ToolResult,
};

/// Active quests allowed at once.
pub const MAX_ACTIVE_QUESTS: usize = 5;
/// A title cannot be reused within this many days.
pub const TITLE_COOLDOWN_DAYS: i64 = 14;

const TITLE_MAX_CHARS: usize = 80;

const CONDITION_TYPES: &[&str] = &[
    "total_minutes",
    "daily_minutes",
    "weekly_minutes",
    "no_fun_days",
    "streak_days",
    "consecutive_days",
];

/// Create a new quest for the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestProposeTool;

#[async_trait]
impl Tool for QuestProposeTool {
    fn name(&self) -> &str {
        "quest_propose"
    }

    fn description(&self) -> &str {
        "Create a quest for the user: a time-bound challenge such as total minutes, a big \
         single day, a weekly total, fun-free days, a streak or consecutive active days. \
         Rewards fun minutes on completion. Check recent history first so the target is \
         realistic. Without a condition the quest asks for total minutes sized by difficulty."
    }

    fn tags(&self) -> &[&'static str] {
        &["quest", "gamification"]
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Short quest title"},
                "description": {"type": "string"},
                "difficulty": {"type": "string", "enum": ["easy", "medium", "hard"]},
                "quest_type": {"type": "string", "description": "Free-form label, e.g. weekly or sprint"},
                "duration_days": {"type": "integer", "minimum": 1, "maximum": 14},
                "condition": {
                    "type": "object",
                    "description": "Minute conditions take target_minutes; no_fun_days takes days; \
                                    streak_days takes target_days; consecutive_days takes \
                                    target_days and min_minutes",
                    "properties": {
                        "type": {"type": "string", "enum": CONDITION_TYPES},
                        "target_minutes": {"type": "integer", "minimum": 30, "maximum": 5000},
                        "category": {"type": "string", "enum": ["study", "build", "training", "job"]},
                        "days": {"type": "integer", "minimum": 1, "maximum": 14},
                        "target_days": {"type": "integer", "minimum": 1, "maximum": 60},
                        "min_minutes": {"type": "integer", "minimum": 15, "maximum": 720}
                    }
                }
            },
            "required": ["title", "description"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let title = args.required_str("title", "a short quest title")?.trim();
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(ParameterValidationError::invalid_value(
                "title",
                title,
                format!("must be at most {} characters", TITLE_MAX_CHARS),
            )
            .into());
        }
        let description = args.required_str("description", "what the user has to do")?.trim();
        let difficulty: Difficulty = args
            .one_of("difficulty", &["easy", "medium", "hard"], Some("medium"))?
            .unwrap_or("medium")
            .parse()?;
        let quest_type = args.optional_str("quest_type").unwrap_or("weekly").trim();
        let duration = args.bounded_i64("duration_days", 7, 1, 14)?;
        let condition = parse_condition(&args, difficulty, duration)?;

        let active = ctx.store.count_active_quests(ctx.user_id)?;
        if active >= MAX_ACTIVE_QUESTS {
            return Err(ToolError::invalid_args(format!(
                "user already has {} active quests (max {}); do not create another",
                active, MAX_ACTIVE_QUESTS
            )));
        }
        let since = ctx.now - Duration::days(TITLE_COOLDOWN_DAYS);
        if ctx.store.quest_title_used_since(ctx.user_id, title, since)? {
            return Err(ToolError::invalid_args(format!(
                "a quest titled '{}' was already created in the last {} days; pick a different title",
                title, TITLE_COOLDOWN_DAYS
            )));
        }

        let quest = ctx.store.insert_quest(NewQuest {
            user_id: ctx.user_id,
            title: title.to_string(),
            description: description.to_string(),
            quest_type: quest_type.to_string(),
            difficulty,
            condition,
            created_at: ctx.now,
            expires_at: ctx.now + Duration::days(duration),
        })?;

        let condition = &quest.condition;
        Ok(ToolOutput::new(json!({
            "quest_id": quest.id,
            "title": quest.title,
            "difficulty": quest.difficulty.as_str(),
            "quest_type": quest.quest_type,
            "condition": condition.type_name(),
            "target": condition.target(),
            "unit": condition.unit().as_str(),
            "category": condition.category().map(|c| c.as_str()),
            "reward_fun_minutes": quest.reward_fun_minutes,
            "penalty_fun_minutes": quest.penalty_fun_minutes,
            "expires": date_label(quest.expires_at),
        }))
        .with_summary(format!(
            "Created quest #{} '{}': {} by {} (reward {})",
            quest.id,
            quest.title,
            condition.describe(),
            date_label(quest.expires_at),
            format_minutes(quest.reward_fun_minutes)
        )))
    }
}

/// Target of a total_minutes quest when the model names no condition.
fn default_target_minutes(difficulty: Difficulty) -> i64 {
    match difficulty {
        Difficulty::Easy => 120,
        Difficulty::Medium => 300,
        Difficulty::Hard => 600,
    }
}

fn parse_condition(
    args: &Value,
    difficulty: Difficulty,
    duration_days: i64,
) -> Result<QuestCondition, ToolError> {
    let condition = match args.get("condition") {
        None | Some(Value::Null) => {
            return Ok(QuestCondition::TotalMinutes {
                target_minutes: default_target_minutes(difficulty),
                category: None,
            });
        }
        Some(condition) if condition.is_object() => condition,
        Some(other) => {
            return Err(
                ParameterValidationError::invalid_type("condition", "object", other.to_string())
                    .into(),
            );
        }
    };

    let kind = condition
        .one_of("type", CONDITION_TYPES, Some("total_minutes"))?
        .unwrap_or("total_minutes");
    let category = || -> Result<Option<Category>, ToolError> {
        match condition.one_of("category", &["study", "build", "training", "job"], None)? {
            Some(name) => Ok(Some(name.parse::<Category>()?)),
            None => Ok(None),
        }
    };

    let parsed = match kind {
        "daily_minutes" => QuestCondition::DailyMinutes {
            target_minutes: required_i64(condition, "target_minutes", 30, 720)?,
            category: category()?,
        },
        "weekly_minutes" => QuestCondition::WeeklyMinutes {
            target_minutes: required_i64(condition, "target_minutes", 30, 5000)?,
        },
        "no_fun_days" => QuestCondition::NoFunDays {
            days: required_i64(condition, "days", 1, duration_days)?,
        },
        "streak_days" => QuestCondition::StreakDays {
            target_days: required_i64(condition, "target_days", 1, 60)?,
        },
        "consecutive_days" => QuestCondition::ConsecutiveDays {
            target_days: required_i64(condition, "target_days", 2, duration_days.max(2))?,
            min_minutes: condition.bounded_i64("min_minutes", 60, 15, 720)?,
        },
        _ => QuestCondition::TotalMinutes {
            target_minutes: required_i64(condition, "target_minutes", 30, 5000)?,
            category: category()?,
        },
    };
    Ok(parsed)
}

fn required_i64(
    condition: &Value,
    name: &'static str,
    min: i64,
    max: i64,
) -> Result<i64, ToolError> {
    if condition.get(name).is_none_or(Value::is_null) {
        return Err(ParameterValidationError::missing(name, "an integer target").into());
    }
    Ok(condition.bounded_i64(name, min, min, max)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolErrorKind;
    use crate::tools::test_support::{ctx, now};

    fn args(title: &str) -> Value {
        json!({
            "title": title,
            "description": "Ship the side project",
            "difficulty": "hard",
            "duration_days": 3,
            "condition": {"type": "total_minutes", "target_minutes": 600, "category": "build"}
        })
    }

    #[tokio::test]
    async fn test_creates_quest_with_rewards() {
        let ctx = ctx();
        let out = QuestProposeTool.run(args("Build sprint"), &ctx).await.unwrap();
        assert_eq!(out.get("reward_fun_minutes"), Some(&json!(120)));
        assert_eq!(out.get("penalty_fun_minutes"), Some(&json!(60)));
        assert_eq!(out.get("expires"), Some(&json!("2026-03-15")));
        assert_eq!(out.get("category"), Some(&json!("build")));
        assert_eq!(out.get("target"), Some(&json!(600)));
        assert_eq!(out.get("unit"), Some(&json!("minutes")));

        let active = ctx.store.active_quests(1).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].expires_at, now() + Duration::days(3));
    }

    #[tokio::test]
    async fn test_defaults() {
        let ctx = ctx();
        let out = QuestProposeTool
            .run(
                json!({"title": "Study", "description": "d", "condition": {"target_minutes": 60}}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("difficulty"), Some(&json!("medium")));
        assert_eq!(out.get("reward_fun_minutes"), Some(&json!(60)));
        assert_eq!(out.get("quest_type"), Some(&json!("weekly")));
        assert_eq!(out.get("category"), Some(&json!(null)));
    }

    #[tokio::test]
    async fn test_duplicate_title_rejected() {
        let ctx = ctx();
        QuestProposeTool.run(args("Deep Work"), &ctx).await.unwrap();
        let err = QuestProposeTool.run(args("  deep work "), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
        assert!(err.message.contains("last 14 days"));
    }

    #[tokio::test]
    async fn test_active_quest_cap() {
        let ctx = ctx();
        for i in 0..MAX_ACTIVE_QUESTS {
            QuestProposeTool
                .run(args(&format!("Quest {}", i)), &ctx)
                .await
                .unwrap();
        }
        let err = QuestProposeTool.run(args("One more"), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
        assert_eq!(ctx.store.count_active_quests(1).unwrap(), MAX_ACTIVE_QUESTS);
    }

    #[tokio::test]
    async fn test_validation() {
        let ctx = ctx();
        for bad in [
            json!({"description": "d", "condition": {"target_minutes": 60}}),
            json!({"title": "t", "description": "d", "condition": {"target_minutes": 10}}),
            json!({"title": "t", "description": "d", "condition": {}}),
            json!({"title": "t", "description": "d", "condition": 60}),
            json!({"title": "t", "description": "d", "duration_days": 30, "condition": {"target_minutes": 60}}),
            json!({"title": "t", "description": "d", "condition": {"target_minutes": 60, "category": "gaming"}}),
            json!({"title": "t", "description": "d", "condition": {"type": "hours", "target_minutes": 60}}),
            json!({"title": "t", "description": "d", "condition": {"type": "daily_minutes", "target_minutes": 900}}),
            json!({"title": "t", "description": "d", "duration_days": 3, "condition": {"type": "no_fun_days", "days": 5}}),
            json!({"title": "t", "description": "d", "condition": {"type": "streak_days"}}),
            json!({"title": "t", "description": "d", "condition": {"type": "consecutive_days", "target_days": 3, "min_minutes": 5}}),
        ] {
            let err = QuestProposeTool.run(bad.clone(), &ctx).await.unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::InvalidArgs, "{}", bad);
        }
        assert_eq!(ctx.store.count_active_quests(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_condition_defaults_to_total_minutes_by_difficulty() {
        let ctx = ctx();
        let out = QuestProposeTool
            .run(
                json!({"title": "Easy week", "description": "d", "difficulty": "easy"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("condition"), Some(&json!("total_minutes")));
        assert_eq!(out.get("target"), Some(&json!(120)));

        let active = ctx.store.active_quests(1).unwrap();
        assert_eq!(
            active[0].condition,
            QuestCondition::TotalMinutes {
                target_minutes: 120,
                category: None
            }
        );
    }

    #[tokio::test]
    async fn test_creates_each_condition_type() {
        let ctx = ctx();
        let cases = [
            (
                json!({"type": "daily_minutes", "target_minutes": 240, "category": "study"}),
                QuestCondition::DailyMinutes {
                    target_minutes: 240,
                    category: Some(Category::Study),
                },
            ),
            (
                json!({"type": "weekly_minutes", "target_minutes": 900}),
                QuestCondition::WeeklyMinutes { target_minutes: 900 },
            ),
            (
                json!({"type": "no_fun_days", "days": 3}),
                QuestCondition::NoFunDays { days: 3 },
            ),
            (
                json!({"type": "streak_days", "target_days": 10}),
                QuestCondition::StreakDays { target_days: 10 },
            ),
            (
                json!({"type": "consecutive_days", "target_days": 4}),
                QuestCondition::ConsecutiveDays {
                    target_days: 4,
                    min_minutes: 60,
                },
            ),
        ];

        for (i, (condition, expected)) in cases.into_iter().enumerate() {
            let out = QuestProposeTool
                .run(
                    json!({
                        "title": format!("Quest {}", i),
                        "description": "d",
                        "condition": condition,
                    }),
                    &ctx,
                )
                .await
                .unwrap();
            assert_eq!(out.get("target"), Some(&json!(expected.target())));
            let id = out.get("quest_id").and_then(Value::as_i64).unwrap();
            let stored = ctx.store.get_quest(1, id).unwrap().unwrap();
            assert_eq!(stored.condition, expected);
        }
    }

    #[tokio::test]
    async fn test_day_conditions_report_days() {
        let ctx = ctx();
        let out = QuestProposeTool
            .run(
                json!({
                    "title": "Unplug",
                    "description": "d",
                    "condition": {"type": "no_fun_days", "days": 2}
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.get("unit"), Some(&json!("days")));
        assert!(out.summary().unwrap().contains("spend no fun time for 2 days"));
    }
}
