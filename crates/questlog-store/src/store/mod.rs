//! SQLite-backed store.
//!
//! One connection behind a mutex. Every public operation takes the lock for
//! the duration of a single statement or transaction, so concurrent agent
//! runs see per-operation atomicity and nothing holds the lock across an
//! await point.

mod cache;
mod entries;
mod history;
mod memories;
mod quests;
mod stats;
mod todos;
mod usage;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

pub use stats::{UserStats, day_start, week_start};
pub use usage::day_key;

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

const SCHEMA_VERSION: i32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence layer for entries, quests, memories, todos, conversation
/// turns, request usage, audit records and the tool cache.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        debug!("In-memory store created");
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let current_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                category TEXT,
                minutes INTEGER NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                fun_earned INTEGER NOT NULL DEFAULT 0,
                note TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_user_time
                ON entries(user_id, created_at);

            CREATE TABLE IF NOT EXISTS quests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                quest_type TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                condition TEXT NOT NULL,
                reward_fun_minutes INTEGER NOT NULL,
                penalty_fun_minutes INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_quests_user_status
                ON quests(user_id, status);

            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_user
                ON memories(user_id, created_at);

            CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_user
                ON conversation_turns(user_id, id);

            CREATE TABLE IF NOT EXISTS llm_usage (
                user_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                request_count INTEGER NOT NULL DEFAULT 0,
                last_request_at TEXT,
                PRIMARY KEY (user_id, day)
            );

            CREATE TABLE IF NOT EXISTS agent_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                mode TEXT NOT NULL,
                question TEXT NOT NULL,
                tags TEXT NOT NULL,
                skills TEXT NOT NULL,
                model TEXT,
                status TEXT NOT NULL,
                steps INTEGER NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                plan_date TEXT NOT NULL,
                title TEXT NOT NULL,
                duration_minutes INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_todos_user_date
                ON todos(user_id, plan_date);

            CREATE TABLE IF NOT EXISTS tool_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that text comparison in SQL orders by time.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp '{}': {}", raw, e)))
}

/// Map a parse failure inside a row closure into a rusqlite error.
pub(crate) fn conversion_error(
    column: usize,
    err: StoreError,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("questlog.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .append_turn(1, crate::TurnRole::User, "hi", Utc::now())
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.recent_turns(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_upgrade_from_first_schema_adds_todos() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("questlog.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 1).unwrap();
        }
        let store = Store::open(&path).unwrap();
        let today = Utc::now().date_naive();
        store.add_todo(1, today, "Migrated", None, Utc::now()).unwrap();
        assert_eq!(store.list_todos(1, today).unwrap().len(), 1);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = ts(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc));
        let b = ts(DateTime::parse_from_rfc3339("2026-01-10T00:00:00Z").unwrap().with_timezone(&Utc));
        assert!(a < b);
        assert_eq!(parse_ts(&a).unwrap().to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(parse_ts("yesterday").is_err());
    }
}
