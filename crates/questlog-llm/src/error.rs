//! Error types for the LLM crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

// ─────────────────────────────────────────────────────────────────────────────
// Rate Limit Info
// ─────────────────────────────────────────────────────────────────────────────

/// Information about a rate limit error.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// The error message from the provider.
    pub message: String,
    /// How long to wait before retrying (if the provider specified).
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Create a new rate limit info with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Parse rate limit info from an OpenAI-style body and `Retry-After` header.
    pub fn parse_openai(message: &str, retry_after_header: Option<&str>) -> Self {
        Self {
            message: message.to_string(),
            retry_after: retry_after_header.and_then(parse_retry_after_header),
        }
    }
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, " (retry after {:.2}s)", retry_after.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Parse a Retry-After header value given in whole seconds.
fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure classification
// ─────────────────────────────────────────────────────────────────────────────

/// How a failed model call is classified for escalation bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider was unreachable, timed out, refused or rate limited the call.
    Transport,
    /// The provider answered but the answer could not be used.
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Validation Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A response from a provider that did not match the expected structure.
#[derive(Debug, Clone, Error)]
pub enum ResponseValidationError {
    /// The response carried neither text nor tool calls.
    #[error("response has no usable content")]
    Empty,

    /// A tool_use block has invalid structure.
    #[error("invalid tool_use block '{id}': {reason}")]
    InvalidToolUse {
        /// The tool use ID (if available).
        id: String,
        /// Why the tool use is invalid.
        reason: String,
    },
}

impl ResponseValidationError {
    /// Create an invalid tool use error.
    pub fn invalid_tool_use(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidToolUse {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<ResponseValidationError> for LlmError {
    fn from(err: ResponseValidationError) -> Self {
        LlmError::Malformed(err.to_string())
    }
}

/// Error type for LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend/API error from the provider.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity error, including timeouts.
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(RateLimitInfo),

    /// The provider answered with something that cannot be used.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Authentication failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error (API key missing, unknown provider, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Create a rate limit error from a message string.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(RateLimitInfo::new(message))
    }

    /// Get the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(info) => info.retry_after,
            _ => None,
        }
    }

    /// Classify this failure for escalation bookkeeping.
    ///
    /// Everything that is not a problem with the content of an answer is a
    /// transport failure: the candidate could not be used for this call.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Malformed(_) | Self::Serialization(_) => FailureKind::Malformed,
            _ => FailureKind::Transport,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            LlmError::Malformed(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            LlmError::Network("down".into()).failure_kind(),
            FailureKind::Transport
        );
        assert_eq!(
            LlmError::rate_limit("slow down").failure_kind(),
            FailureKind::Transport
        );
        assert_eq!(
            LlmError::Auth("bad key".into()).failure_kind(),
            FailureKind::Transport
        );
        assert_eq!(
            LlmError::Malformed("no content".into()).failure_kind(),
            FailureKind::Malformed
        );
        assert_eq!(
            LlmError::Serialization("eof".into()).failure_kind(),
            FailureKind::Malformed
        );
    }

    #[test]
    fn test_rate_limit_retry_after_header() {
        let info = RateLimitInfo::parse_openai("too many", Some("7"));
        assert_eq!(info.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(info.to_string(), "too many (retry after 7.00s)");

        let err = LlmError::RateLimit(RateLimitInfo::parse_openai("x", Some("soon")));
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn test_validation_error_maps_to_malformed() {
        let err: LlmError = ResponseValidationError::Empty.into();
        assert!(matches!(err, LlmError::Malformed(_)));
    }
}
