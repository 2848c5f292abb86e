//! Gamification rules: XP, levels, streaks and the fun-time economy.
//!
//! Productive minutes earn XP (one per minute, except `job`) and fun minutes
//! at a per-category hourly rate. Every 600 productive minutes add a 180
//! minute milestone bonus. Completed quests add their reward. Spend entries
//! draw the balance down.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::Category;

/// Productive minutes a day needs to count toward the streak.
pub const STREAK_DAY_MINUTES: i64 = 120;

/// Productive minutes per milestone block.
pub const MILESTONE_BLOCK_MINUTES: i64 = 600;
const MILESTONE_BONUS_MINUTES: i64 = 180;

const XP_LEVEL2_BASE: i64 = 300;
const XP_LINEAR: i64 = 80;
const XP_QUADRATIC: i64 = 4;

const TITLES: &[&str] = &[
    "Novice",
    "Apprentice",
    "Initiate",
    "Adept",
    "Pathfinder",
    "Journeyman",
    "Artisan",
    "Specialist",
    "Veteran",
    "Expert",
];

/// Fun minutes earned per hour of a category.
pub fn fun_rate_per_hour(category: Category) -> i64 {
    match category {
        Category::Study => 15,
        Category::Build => 20,
        Category::Training => 20,
        Category::Job => 4,
    }
}

/// Fun minutes earned by a productive block.
pub fn fun_from_minutes(category: Category, minutes: i64) -> i64 {
    (minutes.max(0) * fun_rate_per_hour(category)) / 60
}

/// XP earned by a productive block. Paid work earns fun but no XP.
pub fn xp_from_minutes(category: Category, minutes: i64) -> i64 {
    match category {
        Category::Job => 0,
        _ => minutes.max(0),
    }
}

/// XP needed to go from `level - 1` to `level`.
pub fn xp_for_level(level: u32) -> i64 {
    match level {
        0 | 1 => 0,
        2 => XP_LEVEL2_BASE,
        n => {
            let k = i64::from(n) - 2;
            XP_LEVEL2_BASE + XP_LINEAR * k + XP_QUADRATIC * k * k
        }
    }
}

/// Cumulative XP needed to reach `level`.
pub fn total_xp_for_level(level: u32) -> i64 {
    (2..=level).map(xp_for_level).sum()
}

/// Level reached with `total_xp`.
pub fn level_from_xp(total_xp: i64) -> u32 {
    let xp = total_xp.max(0);
    let mut level = 1;
    let mut accumulated = 0;
    loop {
        let needed = xp_for_level(level + 1);
        if accumulated + needed > xp {
            return level;
        }
        accumulated += needed;
        level += 1;
    }
}

/// Display title for a level.
pub fn title_for_level(level: u32) -> String {
    usize::try_from(level)
        .ok()
        .and_then(|l| l.checked_sub(1))
        .and_then(|i| TITLES.get(i))
        .map(|t| t.to_string())
        .unwrap_or_else(|| format!("Level {}", level))
}

/// Where a user sits inside their current level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: u32,
    pub title: String,
    pub total_xp: i64,
    pub current_level_xp: i64,
    pub next_level_xp: i64,
    pub remaining_to_next: i64,
}

impl LevelProgress {
    pub fn from_xp(total_xp: i64) -> Self {
        let xp = total_xp.max(0);
        let level = level_from_xp(xp);
        let floor = total_xp_for_level(level);
        let next_total = total_xp_for_level(level + 1);
        Self {
            level,
            title: title_for_level(level),
            total_xp: xp,
            current_level_xp: xp - floor,
            next_level_xp: (next_total - floor).max(1),
            remaining_to_next: (next_total - xp).max(0),
        }
    }
}

/// Fun-time balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomySnapshot {
    pub base_fun_minutes: i64,
    pub milestone_bonus_minutes: i64,
    pub quest_bonus_minutes: i64,
    pub earned_fun_minutes: i64,
    pub spent_fun_minutes: i64,
    pub remaining_fun_minutes: i64,
}

impl EconomySnapshot {
    /// Combine raw totals into a balance.
    pub fn build(
        base_fun_minutes: i64,
        productive_minutes: i64,
        quest_bonus_minutes: i64,
        spent_fun_minutes: i64,
    ) -> Self {
        let milestone = milestone_bonus(productive_minutes);
        let base = base_fun_minutes.max(0);
        let quest = quest_bonus_minutes.max(0);
        let spent = spent_fun_minutes.max(0);
        let earned = base + milestone + quest;
        Self {
            base_fun_minutes: base,
            milestone_bonus_minutes: milestone,
            quest_bonus_minutes: quest,
            earned_fun_minutes: earned,
            spent_fun_minutes: spent,
            remaining_fun_minutes: earned - spent,
        }
    }
}

/// Bonus fun minutes for every full milestone block of productive time.
pub fn milestone_bonus(productive_minutes: i64) -> i64 {
    (productive_minutes.max(0) / MILESTONE_BLOCK_MINUTES) * MILESTONE_BONUS_MINUTES
}

/// Consecutive qualifying days ending today, or yesterday when today does
/// not qualify yet.
pub fn current_streak(daily_minutes: &BTreeMap<NaiveDate, i64>, today: NaiveDate) -> u32 {
    let qualifies = |day: NaiveDate| {
        daily_minutes
            .get(&day)
            .is_some_and(|m| *m >= STREAK_DAY_MINUTES)
    };

    let mut day = if qualifies(today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0;
    while qualifies(day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

/// Human-readable `1h 30m` formatting.
pub fn format_minutes(minutes: i64) -> String {
    let sign = if minutes < 0 { "-" } else { "" };
    let total = minutes.abs();
    let (h, m) = (total / 60, total % 60);
    match (h, m) {
        (h, 0) => format!("{sign}{h}h"),
        (0, m) => format!("{sign}{m}m"),
        (h, m) => format!("{sign}{h}h {m}m"),
    }
}
