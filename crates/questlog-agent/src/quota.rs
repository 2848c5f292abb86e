//! Per-user request quota and cooldown.

use chrono::{DateTime, Duration, Utc};

use questlog_config::QuotaConfig;
use questlog_store::UsageRecord;

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaDenial {
    #[error("Daily /llm limit reached ({limit}). Try again tomorrow.")]
    DailyLimit { limit: u32 },

    #[error("Please wait a bit before the next /llm request.")]
    Cooldown { retry_in_secs: i64 },
}

/// Checks a user's usage record against the configured limits.
///
/// The gate holds no state. Callers pass in the usage record for today and
/// the time of the user's last request, both owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGate {
    daily_limit: u32,
    cooldown: Duration,
}

impl QuotaGate {
    pub fn new(daily_limit: u32, cooldown_seconds: u64) -> Self {
        Self {
            daily_limit,
            cooldown: Duration::seconds(i64::try_from(cooldown_seconds).unwrap_or(i64::MAX / 1000)),
        }
    }

    /// A gate that never refuses.
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn check(
        &self,
        usage: &UsageRecord,
        last_request_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), QuotaDenial> {
        if self.daily_limit > 0 && usage.request_count >= self.daily_limit {
            return Err(QuotaDenial::DailyLimit {
                limit: self.daily_limit,
            });
        }
        if self.cooldown > Duration::zero()
            && let Some(last) = last_request_at
        {
            let elapsed = now - last;
            if elapsed < self.cooldown {
                return Err(QuotaDenial::Cooldown {
                    retry_in_secs: (self.cooldown - elapsed).num_seconds().max(1),
                });
            }
        }
        Ok(())
    }
}

impl From<&QuotaConfig> for QuotaGate {
    fn from(config: &QuotaConfig) -> Self {
        Self::new(config.daily_limit, config.cooldown_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn usage(count: u32) -> UsageRecord {
        UsageRecord {
            request_count: count,
            ..UsageRecord::empty(1, "2026-03-10")
        }
    }

    #[test]
    fn test_unlimited_never_refuses() {
        let now = Utc::now();
        assert!(QuotaGate::unlimited().check(&usage(10_000), Some(now), now).is_ok());
    }

    #[test]
    fn test_daily_limit() {
        let gate = QuotaGate::new(3, 0);
        let now = Utc::now();
        assert!(gate.check(&usage(2), None, now).is_ok());
        let denial = gate.check(&usage(3), None, now).unwrap_err();
        assert_eq!(denial, QuotaDenial::DailyLimit { limit: 3 });
        assert_eq!(
            denial.to_string(),
            "Daily /llm limit reached (3). Try again tomorrow."
        );
    }

    #[test]
    fn test_cooldown() {
        let gate = QuotaGate::new(0, 30);
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let denial = gate
            .check(&usage(1), Some(last), last + Duration::seconds(10))
            .unwrap_err();
        assert_eq!(denial, QuotaDenial::Cooldown { retry_in_secs: 20 });
        assert_eq!(
            denial.to_string(),
            "Please wait a bit before the next /llm request."
        );
        assert!(
            gate.check(&usage(1), Some(last), last + Duration::seconds(30))
                .is_ok()
        );
    }

    #[test]
    fn test_check_is_idempotent() {
        let gate = QuotaGate::new(5, 60);
        let now = Utc::now();
        let record = usage(4);
        assert_eq!(
            gate.check(&record, None, now),
            gate.check(&record, None, now)
        );
    }
}
