//! Model backend trait and the scripted mock used in tests.
//!
//! A backend performs exactly one remote call per [`LlmBackend::complete`]:
//! prompt, directive, tool schema and conversation in, a response or a typed
//! failure out. Choosing which model to call, and what to do when a call
//! fails, belongs to the caller.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse};

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A provider that can answer one completion request.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send one request and wait for the complete response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Name of this backend, used in logs.
    fn name(&self) -> &str;
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockBackend, mock_text_response, mock_tool_use_response};

#[cfg(any(test, feature = "testing"))]
mod mock {
    use super::*;
    use crate::error::LlmError;
    use crate::types::{ContentBlock, StopReason, Usage};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// A mock backend for testing purposes.
    ///
    /// Returns pre-configured outcomes in order, so tests can script the
    /// exact sequence of answers, tool calls and failures the agent loop
    /// sees. Every request is logged.
    #[derive(Debug)]
    pub struct MockBackend {
        name: String,
        outcomes: Mutex<Vec<Result<CompletionResponse>>>,
        request_log: Mutex<Vec<CompletionRequest>>,
        delay: Option<Duration>,
    }

    impl MockBackend {
        /// Create a mock backend that answers with the given responses.
        ///
        /// If more requests are made than responses available, a backend
        /// error is returned.
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self::scripted(responses.into_iter().map(Ok).collect())
        }

        /// Create a mock backend from a script mixing responses and failures.
        pub fn scripted(outcomes: Vec<Result<CompletionResponse>>) -> Self {
            Self {
                name: "mock".to_string(),
                outcomes: Mutex::new(outcomes),
                request_log: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        /// Create a mock backend with a single text response.
        pub fn with_text(text: impl Into<String>) -> Self {
            Self::new(vec![mock_text_response(text)])
        }

        /// Create a mock backend whose every call fails with a network error.
        pub fn failing() -> Self {
            Self::scripted(Vec::new()).with_name("failing")
        }

        /// Set the backend name.
        pub fn with_name(mut self, name: impl Into<String>) -> Self {
            self.name = name.into();
            self
        }

        /// Sleep before answering each request.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Get all requests that were made to this backend.
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.request_log.lock().clone()
        }

        /// Get the models requested, in call order.
        pub fn requested_models(&self) -> Vec<String> {
            self.request_log
                .lock()
                .iter()
                .map(|r| r.model.clone())
                .collect()
        }

        /// Get the number of requests made.
        pub fn request_count(&self) -> usize {
            self.request_log.lock().len()
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.request_log.lock().push(request);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                return Err(LlmError::Network(format!(
                    "{}: no more responses available",
                    self.name
                )));
            }
            outcomes.remove(0)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// A plain text answer.
    pub fn mock_text_response(text: impl Into<String>) -> CompletionResponse {
        CompletionResponse::new(
            "mock_msg",
            "mock-model",
            vec![ContentBlock::text(text)],
            StopReason::EndTurn,
            Usage::new(10, 20),
        )
    }

    /// A response requesting the given `(id, name, input)` tool calls.
    pub fn mock_tool_use_response(
        calls: Vec<(&str, &str, serde_json::Value)>,
    ) -> CompletionResponse {
        CompletionResponse::new(
            "mock_msg",
            "mock-model",
            calls
                .into_iter()
                .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
                .collect(),
            StopReason::ToolUse,
            Usage::new(10, 20),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::types::Message;

    fn request() -> CompletionRequest {
        CompletionRequest::new("test-model", vec![Message::user("Hi")], 100)
    }

    #[tokio::test]
    async fn test_mock_backend_single_response() {
        let backend = MockBackend::with_text("Hello!");

        let response = backend.complete(request()).await.unwrap();

        assert_eq!(response.text(), "Hello!");
        assert_eq!(backend.request_count(), 1);
        assert_eq!(backend.requested_models(), vec!["test-model"]);
    }

    #[tokio::test]
    async fn test_mock_backend_scripted_failures() {
        let backend = MockBackend::scripted(vec![
            Err(LlmError::rate_limit("slow down")),
            Ok(mock_text_response("second")),
        ]);

        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::RateLimit(_))
        ));
        assert_eq!(backend.complete(request()).await.unwrap().text(), "second");
        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::Network(_))
        ));
        assert_eq!(backend.request_count(), 3);
    }
}
