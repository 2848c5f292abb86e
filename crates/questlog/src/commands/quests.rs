//! Quests command - active quests and their progress.

use anyhow::Result;
use chrono::Utc;
use console::{Style, style};
use serde_json::json;

use questlog_store::format_minutes;

use super::{Context, print_json};

pub fn run(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let now = Utc::now();
    let settled = store.evaluate_quests(ctx.user_id, now)?;

    let mut active = Vec::new();
    for quest in store.active_quests(ctx.user_id)? {
        let progress = store.quest_progress(&quest, now)?;
        active.push((quest, progress));
    }

    if ctx.json_output {
        let quests: Vec<_> = active
            .iter()
            .map(|(quest, progress)| json!({
                    "quest": quest,
                    "progress": progress,
                    "target": quest.condition.target(),
                }))
            .collect();
        return print_json(&json!({"settled": settled, "active": quests}));
    }

    let dim = Style::new().dim();
    for quest in &settled {
        println!("Quest '{}' {}", quest.title, quest.status.as_str());
    }
    if active.is_empty() {
        println!("{}", dim.apply_to("No active quests"));
        return Ok(());
    }

    println!("{}", style("Active quests").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    for (quest, progress) in &active {
        println!(
            "{:>4}  {} {}",
            style(quest.id).cyan(),
            quest.title,
            dim.apply_to(format!("({})", quest.difficulty.as_str()))
        );
        println!(
            "      {} / {} ({}) · reward {} · due {}",
            quest.condition.format_progress(*progress),
            quest.condition.format_progress(quest.condition.target()),
            quest.condition.describe(),
            format_minutes(quest.reward_fun_minutes),
            quest.expires_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}
