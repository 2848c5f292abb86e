//! Expiring key/value cache used by tools that call external services.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::error::Result;

use super::{Store, ts};

impl Store {
    /// Cached value for `key` unless it expired at or before `now`.
    pub fn cache_get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM tool_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, ts(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn cache_put(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tool_cache (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, ts(expires_at)],
        )?;
        Ok(())
    }

    /// Drop expired rows. Returns how many were removed.
    pub fn cache_purge(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM tool_cache WHERE expires_at <= ?1",
            params![ts(now)],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cache_expiry() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.cache_put("k", "v1", now + Duration::seconds(60)).unwrap();
        assert_eq!(store.cache_get("k", now).unwrap().as_deref(), Some("v1"));

        store.cache_put("k", "v2", now + Duration::seconds(60)).unwrap();
        assert_eq!(store.cache_get("k", now).unwrap().as_deref(), Some("v2"));

        let later = now + Duration::seconds(61);
        assert_eq!(store.cache_get("k", later).unwrap(), None);
        assert_eq!(store.cache_purge(later).unwrap(), 1);
        assert_eq!(store.cache_get("missing", now).unwrap(), None);
    }
}
