//! Long-term memory operations.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use tracing::debug;

use crate::error::Result;
use crate::types::{MemoryCategory, MemoryItem, UserId};

use super::{Store, conversion_error, parse_ts, ts};

impl Store {
    pub fn add_memory(
        &self,
        user_id: UserId,
        category: MemoryCategory,
        content: &str,
        tags: &[String],
        created_at: DateTime<Utc>,
    ) -> Result<MemoryItem> {
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memories (user_id, category, content, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, category.as_str(), content, tags_json, ts(created_at)],
        )?;
        let id = conn.last_insert_rowid();
        debug!(user_id, id, category = category.as_str(), "Memory saved");

        Ok(MemoryItem {
            id,
            user_id,
            category,
            content: content.to_string(),
            tags: tags.to_vec(),
            created_at,
        })
    }

    /// Memories, newest first, optionally filtered by category.
    pub fn list_memories(
        &self,
        user_id: UserId,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, category, content, tags, created_at FROM memories
             WHERE user_id = ?1 AND (?2 IS NULL OR category = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, category.map(|c| c.as_str()), limit as i64],
            row_to_memory,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_memories(&self, user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Whether the user already has a memory with this content, ignoring case
    /// and surrounding whitespace.
    pub fn memory_exists(&self, user_id: UserId, content: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1 AND lower(trim(content)) = lower(trim(?2))",
            params![user_id, content],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Delete one memory. Returns `false` when the user has no memory with that id.
    pub fn delete_memory(&self, user_id: UserId, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM memories WHERE user_id = ?1 AND id = ?2",
            params![user_id, id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryItem> {
    let category: String = row.get(2)?;
    let tags: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(MemoryItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: category.parse().map_err(|e| conversion_error(2, e))?,
        content: row.get(3)?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(4, e.into()))?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_error(5, e))?,
    })
}
