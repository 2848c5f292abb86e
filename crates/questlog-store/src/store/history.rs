//! Coach-mode conversation turns.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::Result;
use crate::types::{StoredTurn, TurnRole, UserId};

use super::{Store, conversion_error, parse_ts, ts};

impl Store {
    pub fn append_turn(
        &self,
        user_id: UserId,
        role: TurnRole,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversation_turns (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), content, ts(created_at)],
        )?;
        Ok(())
    }

    /// The last `limit` turns, oldest first.
    pub fn recent_turns(&self, user_id: UserId, limit: usize) -> Result<Vec<StoredTurn>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, role, content, created_at FROM (
                 SELECT * FROM conversation_turns WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let role: String = row.get(2)?;
            let created_at: String = row.get(4)?;
            Ok(StoredTurn {
                id: row.get(0)?,
                user_id: row.get(1)?,
                role: role.parse().map_err(|e| conversion_error(2, e))?,
                content: row.get(3)?,
                created_at: parse_ts(&created_at).map_err(|e| conversion_error(4, e))?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Keep only the newest `keep` turns. Returns how many were removed.
    pub fn prune_turns(&self, user_id: UserId, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM conversation_turns WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM conversation_turns WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
             )",
            params![user_id, keep as i64],
        )?;
        Ok(removed)
    }

    pub fn clear_turns(&self, user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM conversation_turns WHERE user_id = ?1",
            params![user_id],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_and_prune() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let role = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
            store.append_turn(1, role, &format!("turn {i}"), now).unwrap();
        }
        store.append_turn(2, TurnRole::User, "elsewhere", now).unwrap();

        let last = store.recent_turns(1, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].content, "turn 3");
        assert_eq!(last[1].content, "turn 4");

        assert_eq!(store.prune_turns(1, 3).unwrap(), 2);
        let kept = store.recent_turns(1, 10).unwrap();
        assert_eq!(kept.first().unwrap().content, "turn 2");
        assert_eq!(store.recent_turns(2, 10).unwrap().len(), 1);

        assert_eq!(store.clear_turns(1).unwrap(), 3);
    }
}
