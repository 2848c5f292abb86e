//! Quest operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{
    Category, Entry, EntryKind, NewQuest, Quest, QuestCondition, QuestStatus, UserId,
};

use super::{Store, conversion_error, parse_ts, ts, week_start};

const QUEST_COLUMNS: &str = "id, user_id, title, description, quest_type, difficulty, condition, \
     reward_fun_minutes, penalty_fun_minutes, status, created_at, expires_at, completed_at";

impl Store {
    /// Insert an active quest. Rewards follow the difficulty.
    pub fn insert_quest(&self, quest: NewQuest) -> Result<Quest> {
        let condition = serde_json::to_string(&quest.condition)?;
        let reward = quest.difficulty.reward_minutes();
        let penalty = quest.difficulty.penalty_minutes();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO quests (user_id, title, description, quest_type, difficulty, condition,
                                 reward_fun_minutes, penalty_fun_minutes, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                quest.user_id,
                quest.title,
                quest.description,
                quest.quest_type,
                quest.difficulty.as_str(),
                condition,
                reward,
                penalty,
                QuestStatus::Active.as_str(),
                ts(quest.created_at),
                ts(quest.expires_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(user_id = quest.user_id, id, title = %quest.title, "Quest created");

        Ok(Quest {
            id,
            user_id: quest.user_id,
            title: quest.title,
            description: quest.description,
            quest_type: quest.quest_type,
            difficulty: quest.difficulty,
            condition: quest.condition,
            reward_fun_minutes: reward,
            penalty_fun_minutes: penalty,
            status: QuestStatus::Active,
            created_at: quest.created_at,
            expires_at: quest.expires_at,
            completed_at: None,
        })
    }

    pub fn get_quest(&self, user_id: UserId, id: i64) -> Result<Option<Quest>> {
        let conn = self.conn.lock();
        let quest = conn
            .query_row(
                &format!("SELECT {QUEST_COLUMNS} FROM quests WHERE user_id = ?1 AND id = ?2"),
                params![user_id, id],
                row_to_quest,
            )
            .optional()?;
        Ok(quest)
    }

    /// Active quests, oldest first.
    pub fn active_quests(&self, user_id: UserId) -> Result<Vec<Quest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEST_COLUMNS} FROM quests WHERE user_id = ?1 AND status = 'active' ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_quest)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_active_quests(&self, user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quests WHERE user_id = ?1 AND status = 'active'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Quests created at or after `since`, newest first.
    pub fn quests_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Quest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEST_COLUMNS} FROM quests
             WHERE user_id = ?1 AND created_at >= ?2
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id, ts(since)], row_to_quest)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether a quest with this title (case-insensitive) was created since `since`.
    pub fn quest_title_used_since(
        &self,
        user_id: UserId,
        title: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quests
             WHERE user_id = ?1 AND lower(trim(title)) = lower(trim(?2)) AND created_at >= ?3",
            params![user_id, title, ts(since)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fun minutes granted by completed quests.
    pub fn quest_bonus_minutes(&self, user_id: UserId) -> Result<i64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(reward_fun_minutes), 0) FROM quests
             WHERE user_id = ?1 AND status = 'completed'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Settle active quests: complete those whose condition is met, fail
    /// those past their deadline. Returns the quests that changed status.
    pub fn evaluate_quests(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Quest>> {
        let mut changed = Vec::new();
        for mut quest in self.active_quests(user_id)? {
            let progress = self.quest_progress(&quest, now)?;

            let status = if progress >= quest.condition.target() {
                QuestStatus::Completed
            } else if now >= quest.expires_at {
                QuestStatus::Failed
            } else {
                continue;
            };

            let conn = self.conn.lock();
            conn.execute(
                "UPDATE quests SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status.as_str(), ts(now), quest.id],
            )?;
            drop(conn);

            debug!(user_id, id = quest.id, status = status.as_str(), "Quest settled");
            quest.status = status;
            quest.completed_at = Some(now);
            changed.push(quest);
        }
        Ok(changed)
    }

    /// Progress toward a quest's target, in the unit of its condition.
    ///
    /// Entries logged at `now` count; nothing after `expires_at` does.
    pub fn quest_progress(&self, quest: &Quest, now: DateTime<Utc>) -> Result<i64> {
        let start = quest.created_at;
        let end = (now + Duration::seconds(1)).min(quest.expires_at);
        if end <= start {
            return Ok(0);
        }
        let user_id = quest.user_id;

        let progress = match &quest.condition {
            QuestCondition::TotalMinutes { category, .. } => self
                .productive_entries(user_id, start, end, *category)?
                .iter()
                .map(|e| e.minutes)
                .sum(),
            QuestCondition::DailyMinutes { category, .. } => {
                let mut days: BTreeMap<NaiveDate, i64> = BTreeMap::new();
                for entry in self.productive_entries(user_id, start, end, *category)? {
                    *days.entry(entry.created_at.date_naive()).or_insert(0) += entry.minutes;
                }
                days.into_values().max().unwrap_or(0)
            }
            QuestCondition::WeeklyMinutes { .. } => {
                let from = start.max(week_start(end - Duration::seconds(1)));
                self.sum_minutes(user_id, EntryKind::Productive, Some((from, end)))?
            }
            QuestCondition::NoFunDays { days } => {
                let spent = self.sum_minutes(user_id, EntryKind::Spend, Some((start, end)))?;
                if spent > 0 {
                    0
                } else {
                    (end - start).num_days().min(*days)
                }
            }
            QuestCondition::StreakDays { .. } => {
                i64::from(self.streak_days(user_id, end - Duration::seconds(1))?)
            }
            QuestCondition::ConsecutiveDays { min_minutes, .. } => {
                let days = self.daily_productive_minutes(user_id, start, end)?;
                let last = (end - Duration::seconds(1)).date_naive();
                longest_run(&days, start.date_naive(), last, *min_minutes)
            }
        };
        Ok(progress)
    }

    fn productive_entries(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<Category>,
    ) -> Result<Vec<Entry>> {
        Ok(self
            .entries_between(user_id, start, end)?
            .into_iter()
            .filter(|e| e.kind == EntryKind::Productive)
            .filter(|e| category.is_none() || e.category == category)
            .collect())
    }
}

/// Longest run of consecutive days in `[first, last]` with at least `min_minutes`.
fn longest_run(
    days: &BTreeMap<NaiveDate, i64>,
    first: NaiveDate,
    last: NaiveDate,
    min_minutes: i64,
) -> i64 {
    let (mut longest, mut running) = (0, 0);
    let mut day = first;
    while day <= last {
        if days.get(&day).copied().unwrap_or(0) >= min_minutes {
            running += 1;
            longest = longest.max(running);
        } else {
            running = 0;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    longest
}

fn row_to_quest(row: &Row<'_>) -> rusqlite::Result<Quest> {
    let difficulty: String = row.get(5)?;
    let condition: String = row.get(6)?;
    let status: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let expires_at: String = row.get(11)?;
    let completed_at: Option<String> = row.get(12)?;

    Ok(Quest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        quest_type: row.get(4)?,
        difficulty: difficulty.parse().map_err(|e| conversion_error(5, e))?,
        condition: serde_json::from_str(&condition)
            .map_err(|e| conversion_error(6, e.into()))?,
        reward_fun_minutes: row.get(7)?,
        penalty_fun_minutes: row.get(8)?,
        status: status.parse().map_err(|e| conversion_error(9, e))?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_error(10, e))?,
        expires_at: parse_ts(&expires_at).map_err(|e| conversion_error(11, e))?,
        completed_at: completed_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| conversion_error(12, e))?,
    })
}
