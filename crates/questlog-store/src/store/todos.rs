//! Daily todo list operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::{TodoItem, TodoStatus, UserId};

use super::{Store, conversion_error, parse_ts, ts};

const TODO_COLUMNS: &str =
    "id, user_id, plan_date, title, duration_minutes, status, position, created_at, completed_at";

impl Store {
    /// Append a pending item to the end of the user's list for `plan_date`.
    pub fn add_todo(
        &self,
        user_id: UserId,
        plan_date: NaiveDate,
        title: &str,
        duration_minutes: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<TodoItem> {
        let date = plan_date.to_string();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM todos WHERE user_id = ?1 AND plan_date = ?2",
            params![user_id, date],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO todos (user_id, plan_date, title, duration_minutes, status, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                date,
                title,
                duration_minutes,
                TodoStatus::Pending.as_str(),
                position,
                ts(created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!(user_id, id, %plan_date, "Todo added");

        Ok(TodoItem {
            id,
            user_id,
            plan_date,
            title: title.to_string(),
            duration_minutes,
            status: TodoStatus::Pending,
            position,
            created_at,
            completed_at: None,
        })
    }

    /// Items planned for one day, in the order they were added.
    pub fn list_todos(&self, user_id: UserId, plan_date: NaiveDate) -> Result<Vec<TodoItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TODO_COLUMNS} FROM todos
             WHERE user_id = ?1 AND plan_date = ?2
             ORDER BY position ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id, plan_date.to_string()], row_to_todo)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_todo(&self, user_id: UserId, id: i64) -> Result<Option<TodoItem>> {
        let conn = self.conn.lock();
        let item = conn
            .query_row(
                &format!("SELECT {TODO_COLUMNS} FROM todos WHERE user_id = ?1 AND id = ?2"),
                params![user_id, id],
                row_to_todo,
            )
            .optional()?;
        Ok(item)
    }

    /// Mark a pending item done. Returns `false` when the user has no pending
    /// item with that id.
    pub fn complete_todo(&self, user_id: UserId, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE todos SET status = 'done', completed_at = ?1
             WHERE user_id = ?2 AND id = ?3 AND status = 'pending'",
            params![ts(now), user_id, id],
        )?;
        Ok(affected > 0)
    }

    /// Delete one item. Returns `false` when the user has no item with that id.
    pub fn delete_todo(&self, user_id: UserId, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM todos WHERE user_id = ?1 AND id = ?2",
            params![user_id, id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_todo(row: &Row<'_>) -> rusqlite::Result<TodoItem> {
    let plan_date: String = row.get(2)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;

    Ok(TodoItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_date: plan_date
            .parse::<NaiveDate>()
            .map_err(|e| {
                conversion_error(
                    2,
                    StoreError::InvalidData(format!("bad plan date '{}': {}", plan_date, e)),
                )
            })?,
        title: row.get(3)?,
        duration_minutes: row.get(4)?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        position: row.get(6)?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_error(7, e))?,
        completed_at: completed_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| conversion_error(8, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    #[test]
    fn test_items_keep_insertion_order_per_day() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_todo(1, today(), "Write report", Some(90), now()).unwrap();
        let b = store.add_todo(1, today(), "Gym", None, now()).unwrap();
        let tomorrow = today().succ_opt().unwrap();
        let c = store.add_todo(1, tomorrow, "Plan sprint", None, now()).unwrap();
        assert_eq!((a.position, b.position, c.position), (0, 1, 0));

        let items = store.list_todos(1, today()).unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["Write report", "Gym"]);
        assert_eq!(items[0].duration_minutes, Some(90));
        assert_eq!(items[0].status, TodoStatus::Pending);
        assert!(store.list_todos(2, today()).unwrap().is_empty());
    }

    #[test]
    fn test_complete_only_once() {
        let store = Store::open_in_memory().unwrap();
        let item = store.add_todo(1, today(), "Read", None, now()).unwrap();

        assert!(store.complete_todo(1, item.id, now()).unwrap());
        assert!(!store.complete_todo(1, item.id, now()).unwrap());

        let done = store.get_todo(1, item.id).unwrap().unwrap();
        assert_eq!(done.status, TodoStatus::Done);
        assert_eq!(done.completed_at, Some(now()));
    }

    #[test]
    fn test_other_users_cannot_touch_items() {
        let store = Store::open_in_memory().unwrap();
        let item = store.add_todo(1, today(), "Private", None, now()).unwrap();

        assert!(store.get_todo(2, item.id).unwrap().is_none());
        assert!(!store.complete_todo(2, item.id, now()).unwrap());
        assert!(!store.delete_todo(2, item.id).unwrap());

        assert!(store.delete_todo(1, item.id).unwrap());
        assert!(store.get_todo(1, item.id).unwrap().is_none());
    }
}
