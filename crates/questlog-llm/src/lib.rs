//! Model call primitive for Questlog.
//!
//! This crate provides the single-call contract the agent loop depends on
//! (send a directive, tool schema and conversation; get back an answer, tool
//! calls, or a typed failure), an OpenAI-compatible HTTP backend, and the
//! cost-tiered model ladder used for escalation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌───────────────────────────┐
//! │  TierLadder                  │      │  ProviderPool             │
//! │  free → cheap → top          │      │  "openrouter" → backend   │
//! │  plan() → Vec<PlannedModel>  │      │  "openai"     → backend   │
//! └──────────────────────────────┘      └───────────────────────────┘
//!                │                                   │
//!                ▼                                   ▼
//!        ┌──────────────┐  candidate.provider  ┌──────────────────┐
//!        │  Escalator   │ ───────────────────▶ │  LlmBackend      │
//!        │  (forward)   │                      │  complete()      │
//!        └──────────────┘                      └──────────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod openai;
pub mod pool;
pub mod tier;
pub mod types;

pub use backend::{LlmBackend, SharedBackend};
#[cfg(any(test, feature = "testing"))]
pub use backend::{MockBackend, mock_text_response, mock_tool_use_response};
pub use error::{FailureKind, LlmError, RateLimitInfo, ResponseValidationError, Result};
pub use types::{
    CompletionRequest, CompletionResponse, Content, ContentBlock, Message, Role, StopReason,
    ToolDefinition, ToolResultBlock, ToolUseBlock, Usage,
};

// Provider implementations
pub use openai::{OpenAiBackend, OpenAiConfig};

// Ladder and routing
pub use pool::ProviderPool;
pub use tier::{
    EscalationAttempt, Escalator, FALLBACK_MODEL, FALLBACK_TIER, ModelCandidate, ModelTier,
    PlannedModel, TierLadder, VendorPreference,
};
