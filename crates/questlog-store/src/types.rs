//! Record types persisted by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Caller identity. Every record is scoped to one user.
pub type UserId = i64;

// ─────────────────────────────────────────────────────────────────────────────
// Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Whether an entry earns or spends fun time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Productive,
    Spend,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Productive => "productive",
            Self::Spend => "spend",
        }
    }
}

impl FromStr for EntryKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "productive" => Ok(Self::Productive),
            "spend" => Ok(Self::Spend),
            other => Err(StoreError::InvalidData(format!("unknown entry kind '{}'", other))),
        }
    }
}

/// Productive activity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Study,
    Build,
    Training,
    Job,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Study, Self::Build, Self::Training, Self::Job];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Study => "study",
            Self::Build => "build",
            Self::Training => "training",
            Self::Job => "job",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "study" => Ok(Self::Study),
            "build" => Ok(Self::Build),
            "training" => Ok(Self::Training),
            "job" => Ok(Self::Job),
            other => Err(StoreError::InvalidData(format!("unknown category '{}'", other))),
        }
    }
}

/// A logged block of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: UserId,
    pub kind: EntryKind,
    /// `None` for spend entries.
    pub category: Option<Category>,
    pub minutes: i64,
    pub xp: i64,
    pub fun_earned: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Store::add_entry`](crate::Store::add_entry). XP and fun are derived.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: UserId,
    pub kind: EntryKind,
    pub category: Option<Category>,
    pub minutes: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewEntry {
    pub fn productive(
        user_id: UserId,
        category: Category,
        minutes: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            kind: EntryKind::Productive,
            category: Some(category),
            minutes,
            note: None,
            created_at,
        }
    }

    pub fn spend(user_id: UserId, minutes: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind: EntryKind::Spend,
            category: None,
            minutes,
            note: None,
            created_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Quests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Fun minutes granted on completion.
    pub fn reward_minutes(&self) -> i64 {
        match self {
            Self::Easy => 30,
            Self::Medium => 60,
            Self::Hard => 120,
        }
    }

    /// Fun minutes deducted on failure.
    pub fn penalty_minutes(&self) -> i64 {
        self.reward_minutes() / 2
    }
}

impl FromStr for Difficulty {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(StoreError::InvalidData(format!("unknown difficulty '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Completed,
    Failed,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QuestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidData(format!("unknown quest status '{}'", other))),
        }
    }
}

/// Completion condition of a quest. Every condition is measured inside the
/// quest's own window, from `created_at` to the earlier of now and `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestCondition {
    /// Log at least `target_minutes` productive minutes, optionally in one category.
    TotalMinutes {
        target_minutes: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<Category>,
    },
    /// Reach `target_minutes` on a single UTC day.
    DailyMinutes {
        target_minutes: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<Category>,
    },
    /// Reach `target_minutes` within the current Monday-based week.
    WeeklyMinutes { target_minutes: i64 },
    /// Spend no fun time for `days` whole days.
    NoFunDays { days: i64 },
    /// Hold a streak of at least `target_days`.
    StreakDays { target_days: i64 },
    /// Log at least `min_minutes` on `target_days` consecutive days.
    ConsecutiveDays { target_days: i64, min_minutes: i64 },
}

/// What a quest's progress and target count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Minutes,
    Days,
}

impl ProgressUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Days => "days",
        }
    }
}

impl QuestCondition {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TotalMinutes { .. } => "total_minutes",
            Self::DailyMinutes { .. } => "daily_minutes",
            Self::WeeklyMinutes { .. } => "weekly_minutes",
            Self::NoFunDays { .. } => "no_fun_days",
            Self::StreakDays { .. } => "streak_days",
            Self::ConsecutiveDays { .. } => "consecutive_days",
        }
    }

    /// Progress value at which the quest completes.
    pub fn target(&self) -> i64 {
        match self {
            Self::TotalMinutes { target_minutes, .. }
            | Self::DailyMinutes { target_minutes, .. }
            | Self::WeeklyMinutes { target_minutes } => *target_minutes,
            Self::NoFunDays { days } => *days,
            Self::StreakDays { target_days } | Self::ConsecutiveDays { target_days, .. } => {
                *target_days
            }
        }
    }

    pub fn unit(&self) -> ProgressUnit {
        match self {
            Self::TotalMinutes { .. } | Self::DailyMinutes { .. } | Self::WeeklyMinutes { .. } => {
                ProgressUnit::Minutes
            }
            Self::NoFunDays { .. } | Self::StreakDays { .. } | Self::ConsecutiveDays { .. } => {
                ProgressUnit::Days
            }
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Self::TotalMinutes { category, .. } | Self::DailyMinutes { category, .. } => *category,
            _ => None,
        }
    }

    /// Render a progress value in the condition's unit, e.g. `1h 30m` or `3 days`.
    pub fn format_progress(&self, value: i64) -> String {
        match self.unit() {
            ProgressUnit::Minutes => crate::economy::format_minutes(value),
            ProgressUnit::Days if value == 1 => "1 day".to_string(),
            ProgressUnit::Days => format!("{} days", value),
        }
    }

    /// One-line description of what the user has to do.
    pub fn describe(&self) -> String {
        let scope = self.category().map(|c| format!("{} ", c)).unwrap_or_default();
        let target = self.format_progress(self.target());
        match self {
            Self::TotalMinutes { .. } => format!("log {} of {}time", target, scope),
            Self::DailyMinutes { .. } => format!("log {} of {}time in one day", target, scope),
            Self::WeeklyMinutes { .. } => format!("log {} this week", target),
            Self::NoFunDays { .. } => format!("spend no fun time for {}", target),
            Self::StreakDays { .. } => format!("reach a {} streak", target),
            Self::ConsecutiveDays { min_minutes, .. } => format!(
                "log at least {} on {} in a row",
                crate::economy::format_minutes(*min_minutes),
                target
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub id: i64,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub quest_type: String,
    pub difficulty: Difficulty,
    pub condition: QuestCondition,
    pub reward_fun_minutes: i64,
    pub penalty_fun_minutes: i64,
    pub status: QuestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for [`Store::insert_quest`](crate::Store::insert_quest).
#[derive(Debug, Clone)]
pub struct NewQuest {
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub quest_type: String,
    pub difficulty: Difficulty,
    pub condition: QuestCondition,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memories
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Goal,
    Fact,
    Context,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Goal => "goal",
            Self::Fact => "fact",
            Self::Context => "context",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "goal" => Ok(Self::Goal),
            "fact" => Ok(Self::Fact),
            "context" => Ok(Self::Context),
            other => Err(StoreError::InvalidData(format!(
                "unknown memory category '{}'",
                other
            ))),
        }
    }
}

/// A durable fact about the user, injected into coach directives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: i64,
    pub user_id: UserId,
    pub category: MemoryCategory,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Todos
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    Done,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

impl FromStr for TodoStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            other => Err(StoreError::InvalidData(format!("unknown todo status '{}'", other))),
        }
    }
}

/// One item on a user's plan for a day. Items keep the order they were added in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: i64,
    pub user_id: UserId,
    pub plan_date: NaiveDate,
    pub title: String,
    pub duration_minutes: Option<i64>,
    pub status: TodoStatus,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation, usage, audit
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for TurnRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(StoreError::InvalidData(format!("unknown role '{}'", other))),
        }
    }
}

/// One stored coach-mode turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTurn {
    pub id: i64,
    pub user_id: UserId,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user request counter for one UTC day (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: UserId,
    pub day: String,
    pub request_count: u32,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// A record with no requests yet.
    pub fn empty(user_id: UserId, day: impl Into<String>) -> Self {
        Self {
            user_id,
            day: day.into(),
            request_count: 0,
            last_request_at: None,
        }
    }
}

/// Summary of one agent run, written after the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: UserId,
    pub mode: String,
    pub question: String,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
    pub model: Option<String>,
    pub status: String,
    pub steps: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub created_at: DateTime<Utc>,
}
