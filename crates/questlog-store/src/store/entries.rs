//! Time entry operations.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use tracing::debug;

use crate::economy::{fun_from_minutes, xp_from_minutes};
use crate::error::{Result, StoreError};
use crate::types::{Entry, EntryKind, NewEntry, UserId};

use super::{Store, conversion_error, parse_ts, ts};

const ENTRY_COLUMNS: &str =
    "id, user_id, kind, category, minutes, xp, fun_earned, note, created_at";

impl Store {
    /// Record an entry. XP and fun are derived from kind, category and minutes.
    pub fn add_entry(&self, entry: NewEntry) -> Result<Entry> {
        if entry.minutes <= 0 {
            return Err(StoreError::InvalidData(format!(
                "minutes must be positive, got {}",
                entry.minutes
            )));
        }
        let (category, xp, fun) = match entry.kind {
            EntryKind::Productive => {
                let category = entry.category.ok_or_else(|| {
                    StoreError::InvalidData("productive entries need a category".to_string())
                })?;
                (
                    Some(category),
                    xp_from_minutes(category, entry.minutes),
                    fun_from_minutes(category, entry.minutes),
                )
            }
            EntryKind::Spend => (None, 0, 0),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entries (user_id, kind, category, minutes, xp, fun_earned, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.user_id,
                entry.kind.as_str(),
                category.map(|c| c.as_str()),
                entry.minutes,
                xp,
                fun,
                entry.note,
                ts(entry.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(user_id = entry.user_id, id, kind = entry.kind.as_str(), "Inserted entry");

        Ok(Entry {
            id,
            user_id: entry.user_id,
            kind: entry.kind,
            category,
            minutes: entry.minutes,
            xp,
            fun_earned: fun,
            note: entry.note,
            created_at: entry.created_at,
        })
    }

    /// Entries with `start <= created_at < end`, oldest first.
    pub fn entries_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id, ts(start), ts(end)], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent entries, newest first.
    pub fn recent_entries(&self, user_id: UserId, limit: usize) -> Result<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every entry of a user, oldest first.
    pub fn all_entries(&self, user_id: UserId) -> Result<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE user_id = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Sum of minutes of one kind, optionally bounded to `[start, end)`.
    pub fn sum_minutes(
        &self,
        user_id: UserId,
        kind: EntryKind,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let total: i64 = match range {
            Some((start, end)) => conn.query_row(
                "SELECT COALESCE(SUM(minutes), 0) FROM entries
                 WHERE user_id = ?1 AND kind = ?2 AND created_at >= ?3 AND created_at < ?4",
                params![user_id, kind.as_str(), ts(start), ts(end)],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COALESCE(SUM(minutes), 0) FROM entries WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(total)
    }
}

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let kind: String = row.get(2)?;
    let category: Option<String> = row.get(3)?;
    let created_at: String = row.get(8)?;
    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: kind.parse().map_err(|e| conversion_error(2, e))?,
        category: category
            .map(|c| c.parse())
            .transpose()
            .map_err(|e| conversion_error(3, e))?,
        minutes: row.get(4)?,
        xp: row.get(5)?,
        fun_earned: row.get(6)?,
        note: row.get(7)?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_error(8, e))?,
    })
}
