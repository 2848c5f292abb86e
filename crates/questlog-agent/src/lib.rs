//! Agent core for Questlog.
//!
//! A bounded, tool-calling loop that answers questions about a user's
//! logged time, quests and habits, plus everything wrapped around it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AgentRuntime::run_agent                                    │
//! │  quota gate → intent routing → directive + context → loop   │
//! │  → coach history → audit                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌────────────┐  ┌────────────┐  ┌────────────┐
//!       │ AgentLoop  │  │ToolRegistry│  │   Store    │
//!       │ + Budget   │  │ (6 tools)  │  │ (sqlite)   │
//!       └────────────┘  └────────────┘  └────────────┘
//!              │
//!              ▼
//!       ┌────────────────────────────┐
//!       │ TierLadder + ProviderPool  │
//!       │ (questlog-llm)             │
//!       └────────────────────────────┘
//! ```
//!
//! # Core Components
//!
//! - [`AgentRuntime`]: stateless and coach entry points
//! - [`AgentLoop`]: the step state machine with escalation
//! - [`Budget`]: step, tool-call and token ceilings for one run
//! - [`ToolRegistry`]: named tools, filtered per request by tag
//! - [`IntentRouter`]: keyword rules and skills

pub mod agent;
pub mod budget;
pub mod context;
pub mod error;
pub mod memory;
pub mod prompt;
pub mod quota;
pub mod router;
pub mod runtime;
pub mod tool;
pub mod tools;

// Re-export core types
pub use error::{AgentError, Result};

// Re-export the loop
pub use agent::{
    AgentLoop, AgentRequest, AgentRunResult, LoopInput, Mode, RunStatus, StepOutcome, StepRecord,
    Termination,
};
pub use budget::{Budget, BudgetLimit, BudgetLimits, BudgetSnapshot};
pub use context::Transcript;

// Re-export tool types
pub use tool::{
    ParamExt, ParameterValidationError, Tool, ToolContext, ToolError, ToolErrorKind, ToolOutput,
    ToolRegistry, ToolResult, ToolSet, run_tool,
};
pub use tools::default_registry;

// Re-export routing, memory and quota
pub use memory::{ConversationTurn, ConversationWindow};
pub use quota::{QuotaDenial, QuotaGate};
pub use router::{DEFAULT_TAGS, IntentRouter, RouteDecision, Skill};

// Re-export the entry points
pub use runtime::{AgentRuntime, COACH_CORE_TAGS, build_ladder, build_pool};

// Cancellation for callers of `run_agent`
pub use tokio_util::sync::CancellationToken;
