//! Log and spend commands - record time entries.

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use questlog_store::{Category, NewEntry, format_minutes};

use super::{Context, print_json};

/// Arguments for the log command.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Minutes spent
    pub minutes: i64,

    /// Category: study, build, training or job
    pub category: Category,

    /// Free-text note
    #[arg(short, long)]
    pub note: Option<String>,
}

/// Arguments for the spend command.
#[derive(Args, Debug)]
pub struct SpendArgs {
    /// Fun minutes spent
    pub minutes: i64,

    /// What they were spent on
    #[arg(short, long)]
    pub note: Option<String>,
}

pub fn run_log(args: LogArgs, ctx: &Context) -> Result<()> {
    check_minutes(args.minutes)?;
    let now = Utc::now();
    let mut entry = NewEntry::productive(ctx.user_id, args.category, args.minutes, now);
    if let Some(note) = args.note {
        entry = entry.with_note(note);
    }
    record(entry, ctx)
}

pub fn run_spend(args: SpendArgs, ctx: &Context) -> Result<()> {
    check_minutes(args.minutes)?;
    let now = Utc::now();
    let mut entry = NewEntry::spend(ctx.user_id, args.minutes, now);
    if let Some(note) = args.note {
        entry = entry.with_note(note);
    }
    record(entry, ctx)
}

fn check_minutes(minutes: i64) -> Result<()> {
    if !(1..=24 * 60).contains(&minutes) {
        bail!("minutes must be between 1 and 1440, got {}", minutes);
    }
    Ok(())
}

fn record(entry: NewEntry, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let now = entry.created_at;
    let entry = store.add_entry(entry)?;
    let settled = store.evaluate_quests(ctx.user_id, now)?;
    let stats = store.user_stats(ctx.user_id, now)?;

    if ctx.json_output {
        return print_json(&json!({
            "entry": entry,
            "settled_quests": settled,
            "stats": {
                "level": stats.level.level,
                "streak_days": stats.streak_days,
                "today_productive_minutes": stats.today_productive_minutes,
                "remaining_fun_minutes": stats.economy.remaining_fun_minutes,
            },
        }));
    }

    let dim = Style::new().dim();
    match entry.category {
        Some(category) => println!(
            "{} {} of {} (+{} xp, +{} fun)",
            style("Logged").green(),
            format_minutes(entry.minutes),
            category,
            entry.xp,
            format_minutes(entry.fun_earned)
        ),
        None => println!(
            "{} {} of fun time",
            style("Spent").yellow(),
            format_minutes(entry.minutes)
        ),
    }
    for quest in &settled {
        println!("Quest '{}' {}", quest.title, quest.status.as_str());
    }
    println!(
        "{}",
        dim.apply_to(format!(
            "Level {} · streak {} days · today {} · fun left {}",
            stats.level.level,
            stats.streak_days,
            format_minutes(stats.today_productive_minutes),
            format_minutes(stats.economy.remaining_fun_minutes)
        ))
    );
    Ok(())
}
