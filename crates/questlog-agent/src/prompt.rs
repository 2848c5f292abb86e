//! Directive and context text for the two run modes.
//!
//! The system text of a run is assembled from three parts, joined with blank
//! lines:
//!
//! 1. the mode directive, followed by any active skill fragments
//! 2. a stats snapshot of the user at request time
//! 3. coach mode only: the durable memories known about the user

use chrono::{DateTime, Utc};

use questlog_store::{MemoryItem, UserStats, format_minutes};

use crate::agent::Mode;
use crate::context::truncate_chars;
use crate::router::RouteDecision;

/// Directive for one-shot questions.
pub const STATELESS_DIRECTIVE: &str = "Be accurate, concise, and use tools only when needed.";

/// Directive for coach conversations.
pub const COACH_DIRECTIVE: &str = "You are a supportive, data-driven personal productivity coach. \
     Use conversation history and user memories to give personalized advice.";

/// Appended to answers of runs that stopped on a budget ceiling.
pub const PARTIAL_NOTE: &str =
    "\n\n(Note: this answer may be incomplete; the request ran out of budget before finishing.)";

/// Answer of a run in which no model candidate produced a usable response.
pub const PROVIDERS_UNAVAILABLE: &str =
    "All model providers are unavailable right now. Please try again later.";

/// Answer of a cancelled run.
pub const CANCELLED: &str = "The request was cancelled.";

/// Answer of a run that hit a budget ceiling before the model said anything.
pub const BUDGET_EXHAUSTED: &str = "The request ran out of budget before an answer was produced. \
     Please try again with a narrower question.";

/// Characters of each memory shown in the context.
pub const MEMORY_LINE_CHARS: usize = 200;

/// Base directive for a mode, with skill fragments appended.
pub fn directive(mode: Mode, decision: &RouteDecision) -> String {
    let base = match mode {
        Mode::Stateless => STATELESS_DIRECTIVE,
        Mode::Coach => COACH_DIRECTIVE,
    };
    decision.apply_skills(base)
}

/// Snapshot of the user's progress.
pub fn stats_context(stats: &UserStats, now: DateTime<Utc>) -> String {
    format!(
        "Current time: {} UTC\n\
         Level: {} ({})\n\
         XP total: {}, to next level: {}\n\
         Streak: {} days\n\
         Today productive: {}\n\
         Week productive: {}, week spent: {}\n\
         Fun remaining: {}\n\
         Active quests: {}",
        now.format("%Y-%m-%d %H:%M"),
        stats.level.level,
        stats.level.title,
        stats.level.total_xp,
        stats.level.remaining_to_next,
        stats.streak_days,
        format_minutes(stats.today_productive_minutes),
        format_minutes(stats.week_productive_minutes),
        format_minutes(stats.week_spent_minutes),
        format_minutes(stats.economy.remaining_fun_minutes),
        stats.active_quests
    )
}

/// Known facts about the user, one per line. `None` when there are none.
pub fn memory_context(memories: &[MemoryItem]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let mut lines = vec!["Known about user:".to_string()];
    for memory in memories {
        let tags = if memory.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", memory.tags.join(", "))
        };
        lines.push(format!(
            "- ({}{}) {}",
            memory.category.as_str(),
            tags,
            truncate_chars(&memory.content, MEMORY_LINE_CHARS)
        ));
    }
    Some(lines.join("\n"))
}

/// Full system text: directive, then the context blocks.
pub fn system_prompt(directive: &str, context: &[String]) -> String {
    let context: Vec<&str> = context
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if context.is_empty() {
        return directive.to_string();
    }
    format!("{}\n\n## User context\n{}", directive, context.join("\n\n"))
}
