//! Derived per-user numbers: level, streak, weekly totals, economy.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::economy::{EconomySnapshot, LevelProgress, current_streak};
use crate::error::Result;
use crate::types::{EntryKind, UserId};

use super::Store;

/// Snapshot of a user's progress at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub level: LevelProgress,
    pub streak_days: u32,
    pub today_productive_minutes: i64,
    pub week_productive_minutes: i64,
    pub week_spent_minutes: i64,
    pub economy: EconomySnapshot,
    pub active_quests: usize,
}

/// Monday 00:00 UTC of the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = i64::from(now.weekday().num_days_from_monday());
    day_start(now) - Duration::days(days_from_monday)
}

/// 00:00 UTC of the day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

impl Store {
    /// Productive minutes per UTC day over `[start, end)`.
    pub fn daily_productive_minutes(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<NaiveDate, i64>> {
        let mut days = BTreeMap::new();
        for entry in self.entries_between(user_id, start, end)? {
            if entry.kind == EntryKind::Productive {
                *days.entry(entry.created_at.date_naive()).or_insert(0) += entry.minutes;
            }
        }
        Ok(days)
    }

    /// Current streak, counting qualifying days back from `now`.
    pub fn streak_days(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u32> {
        // A streak longer than a year is still reported as the last 366 days.
        let start = day_start(now) - Duration::days(366);
        let days = self.daily_productive_minutes(user_id, start, now + Duration::seconds(1))?;
        Ok(current_streak(&days, now.date_naive()))
    }

    /// Economy over all time.
    pub fn economy(&self, user_id: UserId) -> Result<EconomySnapshot> {
        let entries = self.all_entries(user_id)?;
        let (mut base_fun, mut productive, mut spent) = (0, 0, 0);
        for e in &entries {
            match e.kind {
                EntryKind::Productive => {
                    base_fun += e.fun_earned;
                    productive += e.minutes;
                }
                EntryKind::Spend => spent += e.minutes,
            }
        }
        let quest_bonus = self.quest_bonus_minutes(user_id)?;
        Ok(EconomySnapshot::build(base_fun, productive, quest_bonus, spent))
    }

    pub fn user_stats(&self, user_id: UserId, now: DateTime<Utc>) -> Result<UserStats> {
        let total_xp: i64 = self.all_entries(user_id)?.iter().map(|e| e.xp).sum();
        let until = now + Duration::seconds(1);
        let week = Some((week_start(now), until));

        Ok(UserStats {
            level: LevelProgress::from_xp(total_xp),
            streak_days: self.streak_days(user_id, now)?,
            today_productive_minutes: self.sum_minutes(
                user_id,
                EntryKind::Productive,
                Some((day_start(now), until)),
            )?,
            week_productive_minutes: self.sum_minutes(user_id, EntryKind::Productive, week)?,
            week_spent_minutes: self.sum_minutes(user_id, EntryKind::Spend, week)?,
            economy: self.economy(user_id)?,
            active_quests: self.count_active_quests(user_id)?,
        })
    }
}
