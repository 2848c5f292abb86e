//! Persistence layer for Questlog.
//!
//! A single SQLite database (via `rusqlite`, bundled) holding time entries,
//! quests, long-term memories, coach conversation turns, per-day request
//! usage, agent audit records and an expiring tool cache, plus the
//! gamification rules ([`economy`]) that derived numbers are computed with.

pub mod economy;
pub mod error;
pub mod store;
pub mod types;

pub use economy::{
    EconomySnapshot, LevelProgress, MILESTONE_BLOCK_MINUTES, STREAK_DAY_MINUTES, format_minutes,
};
pub use error::{Result, StoreError};
pub use store::{Store, UserStats, day_key, day_start, week_start};
pub use types::{
    AuditRecord, Category, Difficulty, Entry, EntryKind, MemoryCategory, MemoryItem, NewEntry,
    NewQuest, ProgressUnit, Quest, QuestCondition, QuestStatus, StoredTurn, TodoItem, TodoStatus,
    TurnRole, UsageRecord, UserId,
};
