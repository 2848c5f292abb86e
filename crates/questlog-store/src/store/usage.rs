//! Request usage counters and run audit records.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::error::Result;
use crate::types::{AuditRecord, UsageRecord, UserId};

use super::{Store, conversion_error, parse_ts, ts};

/// UTC day key used by the usage table.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl Store {
    /// Usage for the UTC day containing `now`.
    pub fn usage_for_day(&self, user_id: UserId, now: DateTime<Utc>) -> Result<UsageRecord> {
        let conn = self.conn.lock();
        read_usage(&conn, user_id, &day_key(now))
    }

    /// Check a request against the user's usage and count it, as one
    /// transaction.
    ///
    /// `check` sees today's usage and the most recent request of any day.
    /// The request is counted only when `check` passes; its error is handed
    /// back untouched. Two concurrent requests can never both pass a check
    /// that only one of them should.
    pub fn admit_request<E>(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        check: impl FnOnce(&UsageRecord, Option<DateTime<Utc>>) -> std::result::Result<(), E>,
    ) -> Result<std::result::Result<UsageRecord, E>> {
        let day = day_key(now);
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let usage = read_usage(&tx, user_id, &day)?;
        let last = read_last_request(&tx, user_id)?;
        if let Err(denied) = check(&usage, last) {
            return Ok(Err(denied));
        }

        tx.execute(
            "INSERT INTO llm_usage (user_id, day, request_count, last_request_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(user_id, day) DO UPDATE SET
                 request_count = request_count + 1,
                 last_request_at = excluded.last_request_at",
            params![user_id, day, ts(now)],
        )?;
        let counted = read_usage(&tx, user_id, &day)?;
        tx.commit()?;

        debug!(user_id, day = %day, count = counted.request_count, "Usage recorded");
        Ok(Ok(counted))
    }

    /// Most recent request of any day, for cooldowns that span midnight.
    pub fn last_request_at(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        read_last_request(&conn, user_id)
    }

    pub fn insert_audit(&self, record: &AuditRecord) -> Result<i64> {
        let tags = serde_json::to_string(&record.tags)?;
        let skills = serde_json::to_string(&record.skills)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_audit (user_id, mode, question, tags, skills, model, status, steps,
                                      prompt_tokens, completion_tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.user_id,
                record.mode,
                record.question,
                tags,
                skills,
                record.model,
                record.status,
                record.steps,
                record.prompt_tokens as i64,
                record.completion_tokens as i64,
                ts(record.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Audit records, newest first.
    pub fn recent_audits(&self, user_id: UserId, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, mode, question, tags, skills, model, status, steps,
                    prompt_tokens, completion_tokens, created_at
             FROM agent_audit WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let tags: String = row.get(3)?;
            let skills: String = row.get(4)?;
            let prompt: i64 = row.get(8)?;
            let completion: i64 = row.get(9)?;
            let created_at: String = row.get(10)?;
            Ok(AuditRecord {
                user_id: row.get(0)?,
                mode: row.get(1)?,
                question: row.get(2)?,
                tags: serde_json::from_str(&tags).map_err(|e| conversion_error(3, e.into()))?,
                skills: serde_json::from_str(&skills)
                    .map_err(|e| conversion_error(4, e.into()))?,
                model: row.get(5)?,
                status: row.get(6)?,
                steps: row.get(7)?,
                prompt_tokens: prompt.max(0) as u64,
                completion_tokens: completion.max(0) as u64,
                created_at: parse_ts(&created_at).map_err(|e| conversion_error(10, e))?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn read_usage(conn: &Connection, user_id: UserId, day: &str) -> Result<UsageRecord> {
    let record = conn
        .query_row(
            "SELECT request_count, last_request_at FROM llm_usage WHERE user_id = ?1 AND day = ?2",
            params![user_id, day],
            |row| {
                let count: i64 = row.get(0)?;
                let last: Option<String> = row.get(1)?;
                Ok((count, last))
            },
        )
        .optional()?;

    match record {
        None => Ok(UsageRecord::empty(user_id, day)),
        Some((count, last)) => Ok(UsageRecord {
            user_id,
            day: day.to_string(),
            request_count: u32::try_from(count.max(0)).unwrap_or(u32::MAX),
            last_request_at: last.as_deref().map(parse_ts).transpose()?,
        }),
    }
}

fn read_last_request(conn: &Connection, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
    let last: Option<String> = conn.query_row(
        "SELECT MAX(last_request_at) FROM llm_usage WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    last.as_deref().map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn always(_: &UsageRecord, _: Option<DateTime<Utc>>) -> std::result::Result<(), ()> {
        Ok(())
    }

    #[test]
    fn test_usage_counts_per_day() {
        let store = Store::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();

        assert_eq!(store.usage_for_day(1, t).unwrap().request_count, 0);
        store.admit_request(1, t, always).unwrap().unwrap();
        let rec = store
            .admit_request(1, t + Duration::seconds(10), always)
            .unwrap()
            .unwrap();
        assert_eq!(rec.request_count, 2);
        assert_eq!(rec.day, "2026-03-10");
        assert_eq!(rec.last_request_at, Some(t + Duration::seconds(10)));

        let next_day = t + Duration::minutes(2);
        assert_eq!(store.usage_for_day(1, next_day).unwrap().request_count, 0);
        assert_eq!(
            store.last_request_at(1).unwrap(),
            Some(t + Duration::seconds(10))
        );
        assert_eq!(store.last_request_at(2).unwrap(), None);
    }

    #[test]
    fn test_refused_request_is_not_counted() {
        let store = Store::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        store.admit_request(1, t, always).unwrap().unwrap();

        let refused = store
            .admit_request(1, t, |usage, last| {
                assert_eq!(usage.request_count, 1);
                assert_eq!(last, Some(t));
                Err("cooldown")
            })
            .unwrap();
        assert_eq!(refused, Err("cooldown"));
        assert_eq!(store.usage_for_day(1, t).unwrap().request_count, 1);
    }

    #[test]
    fn test_concurrent_admissions_respect_the_limit() {
        let store = Store::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let limit = 3;

        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|_| {
                    scope.spawn(|| {
                        store
                            .admit_request(1, t, |usage, _| {
                                if usage.request_count >= limit {
                                    Err(())
                                } else {
                                    Ok(())
                                }
                            })
                            .unwrap()
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, limit as usize);
        assert_eq!(store.usage_for_day(1, t).unwrap().request_count, limit);
    }

    #[test]
    fn test_audit_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let record = AuditRecord {
            user_id: 7,
            mode: "coach".into(),
            question: "how am I doing?".into(),
            tags: vec!["data".into(), "memory".into()],
            skills: vec!["coach".into()],
            model: Some("openai/gpt-4o-mini".into()),
            status: "ok".into(),
            steps: 2,
            prompt_tokens: 900,
            completion_tokens: 120,
            created_at: Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
        };
        store.insert_audit(&record).unwrap();
        let audits = store.recent_audits(7, 5).unwrap();
        assert_eq!(audits, vec![record]);
    }
}
