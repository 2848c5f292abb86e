//! Error types for the agent crate.

use thiserror::Error;

use crate::budget::BudgetLimit;
use crate::tool::ToolError;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The per-user quota or cooldown refused the request.
    #[error("{0}")]
    QuotaExceeded(String),

    /// A model was unreachable, rate limited or refused the call.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A model answered with something that could not be used.
    #[error("Malformed model output: {0}")]
    MalformedModelOutput(String),

    /// A tool invoked outside the loop failed.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// A run ceiling was reached.
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(BudgetLimit),

    /// The run was cancelled before it started.
    #[error("Request cancelled")]
    Cancelled,

    /// Tool registration was rejected.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence error.
    #[error("Store error: {0}")]
    Store(#[from] questlog_store::StoreError),

    /// LLM backend error outside a model call (setup, ladder construction).
    #[error("LLM error: {0}")]
    Llm(#[from] questlog_llm::LlmError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Classify a failed model call for escalation.
    pub fn from_model_failure(err: &questlog_llm::LlmError) -> Self {
        match err.failure_kind() {
            questlog_llm::FailureKind::Transport => Self::TransportFailure(err.to_string()),
            questlog_llm::FailureKind::Malformed => Self::MalformedModelOutput(err.to_string()),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure should move escalation to the next candidate.
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::MalformedModelOutput(_)
        )
    }

    /// Failure kind for a model failure, `None` for everything else.
    pub fn failure_kind(&self) -> Option<questlog_llm::FailureKind> {
        match self {
            Self::TransportFailure(_) => Some(questlog_llm::FailureKind::Transport),
            Self::MalformedModelOutput(_) => Some(questlog_llm::FailureKind::Malformed),
            _ => None,
        }
    }
}
