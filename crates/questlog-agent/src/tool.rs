//! Tool framework for agent capabilities.
//!
//! This module defines the [`Tool`] trait every tool implements, the
//! request-scoped [`ToolContext`] handed to each call, and the
//! [`ToolRegistry`] the agent selects tools from by tag.
//!
//! # Example
//!
//! ```rust,ignore
//! use questlog_agent::{Tool, ToolContext, ToolOutput, ToolRegistry, ToolResult};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Repeats its input" }
//!     fn tags(&self) -> &[&'static str] { &["debug"] }
//!     fn parameters(&self) -> Value { json!({"type": "object"}) }
//!
//!     async fn run(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
//!         Ok(ToolOutput::new(args))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Echo)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use questlog_config::QuestlogConfig;
use questlog_llm::ToolDefinition;
use questlog_store::{Store, StoreError, UserId};

use crate::budget::BudgetSnapshot;
use crate::error::{AgentError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for tool parameter validation failures.
///
/// Messages are written for the model, so it can correct its arguments on
/// the next step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParameterValidationError {
    /// A required parameter is missing.
    #[error("missing required parameter '{name}': {hint}")]
    MissingRequired {
        name: &'static str,
        hint: &'static str,
    },

    /// A parameter has an invalid type.
    #[error("invalid type for '{name}': expected {expected}, got {actual}")]
    InvalidType {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },

    /// A parameter value is out of range.
    #[error("'{name}' value {value} is out of range: {constraint}")]
    OutOfRange {
        name: &'static str,
        value: String,
        constraint: String,
    },

    /// A parameter value doesn't match an allowed value.
    #[error("'{name}' has invalid value '{value}': {message}")]
    InvalidValue {
        name: &'static str,
        value: String,
        message: String,
    },
}

impl ParameterValidationError {
    pub fn missing(name: &'static str, hint: &'static str) -> Self {
        Self::MissingRequired { name, hint }
    }

    pub fn invalid_type(
        name: &'static str,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidType {
            name,
            expected,
            actual: actual.into(),
        }
    }

    pub fn out_of_range(
        name: &'static str,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            name,
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    pub fn invalid_value(
        name: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name,
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Result type for parameter validation.
pub type ParamResult<T> = std::result::Result<T, ParameterValidationError>;

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Helper trait for extracting and validating parameters from JSON.
pub trait ParamExt {
    /// Get a required, non-blank string parameter.
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str>;

    /// Get an optional string parameter. Blank strings count as absent.
    fn optional_str(&self, name: &str) -> Option<&str>;

    /// Get an integer parameter, falling back to `default` when absent and
    /// rejecting values outside `[min, max]`.
    fn bounded_i64(&self, name: &'static str, default: i64, min: i64, max: i64)
    -> ParamResult<i64>;

    /// Get a string parameter that must be one of `allowed`.
    fn one_of(
        &self,
        name: &'static str,
        allowed: &[&'static str],
        default: Option<&'static str>,
    ) -> ParamResult<Option<&'static str>>;

    /// Get an optional array of strings.
    fn string_list(&self, name: &'static str) -> ParamResult<Vec<String>>;
}

impl ParamExt for Value {
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ParameterValidationError::missing(name, hint)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ParameterValidationError::missing(name, hint))
            }
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(ParameterValidationError::invalid_type(
                name,
                "string",
                json_type_name(other),
            )),
        }
    }

    fn optional_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    fn bounded_i64(
        &self,
        name: &'static str,
        default: i64,
        min: i64,
        max: i64,
    ) -> ParamResult<i64> {
        let value = match self.get(name) {
            None | Some(Value::Null) => return Ok(default),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| ParameterValidationError::invalid_type(name, "integer", "number"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ParameterValidationError::invalid_type(name, "integer", "string"))?,
            Some(other) => {
                return Err(ParameterValidationError::invalid_type(
                    name,
                    "integer",
                    json_type_name(other),
                ));
            }
        };
        if value < min || value > max {
            return Err(ParameterValidationError::out_of_range(
                name,
                value,
                format!("must be between {} and {}", min, max),
            ));
        }
        Ok(value)
    }

    fn one_of(
        &self,
        name: &'static str,
        allowed: &[&'static str],
        default: Option<&'static str>,
    ) -> ParamResult<Option<&'static str>> {
        let Some(raw) = self.optional_str(name) else {
            return Ok(default);
        };
        let wanted = raw.trim().to_ascii_lowercase();
        allowed
            .iter()
            .find(|a| **a == wanted)
            .map(|a| Some(*a))
            .ok_or_else(|| {
                ParameterValidationError::invalid_value(
                    name,
                    raw,
                    format!("expected one of: {}", allowed.join(", ")),
                )
            })
    }

    fn string_list(&self, name: &'static str) -> ParamResult<Vec<String>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                        ParameterValidationError::invalid_type(
                            name,
                            "array of strings",
                            json_type_name(item),
                        )
                    })
                })
                .filter(|r| r.as_ref().map(|s| !s.is_empty()).unwrap_or(true))
                .collect(),
            Some(other) => Err(ParameterValidationError::invalid_type(
                name,
                "array of strings",
                json_type_name(other),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Result
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of tool failure surfaced to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArgs,
    NotFound,
    UpstreamFailure,
    Internal,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgs => "invalid_args",
            Self::NotFound => "not_found",
            Self::UpstreamFailure => "upstream_failure",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool failure, returned as a value and fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArgs, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::UpstreamFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message)
    }

    /// Text fed back to the model.
    pub fn to_observation(&self) -> String {
        format!("Error ({}): {}", self.kind, self.message)
    }
}

impl From<ParameterValidationError> for ToolError {
    fn from(err: ParameterValidationError) -> Self {
        Self::invalid_args(err.to_string())
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::not_found(what),
            StoreError::InvalidData(msg) => Self::invalid_args(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

/// A successful tool result: a flat structured payload plus an optional
/// one-line summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    payload: Map<String, Value>,
    summary: Option<String>,
}

impl ToolOutput {
    /// Wrap a JSON value. Non-object values land under `"value"`.
    pub fn new(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            payload,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Text fed back to the model: the summary line, then compact JSON.
    pub fn to_observation(&self) -> String {
        let json = Value::Object(self.payload.clone()).to_string();
        match &self.summary {
            Some(summary) => format!("{}\n{}", summary, json),
            None => json,
        }
    }
}

/// Result of one tool invocation.
pub type ToolResult = std::result::Result<ToolOutput, ToolError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic capability the model may invoke.
///
/// Tools are stateless across requests; everything request-specific comes
/// in through the [`ToolContext`]. Failures are returned as [`ToolError`]
/// values and never escape as panics or agent errors.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// Tags used for selective exposure. Must not be empty.
    fn tags(&self) -> &[&'static str];

    /// JSON Schema for the arguments.
    fn parameters(&self) -> Value;

    /// Whether the tool writes user data.
    fn mutating(&self) -> bool {
        false
    }

    /// Run the tool.
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

/// Run a tool with argument-shape checking and a timeout.
///
/// A timeout becomes an `upstream_failure` error, so one slow tool never
/// ends the run.
pub async fn run_tool(
    tool: &dyn Tool,
    args: Value,
    ctx: &ToolContext,
    timeout: Duration,
) -> ToolResult {
    if !args.is_object() {
        return Err(ToolError::invalid_args(format!(
            "arguments for '{}' must be a JSON object",
            tool.name()
        )));
    }
    match tokio::time::timeout(timeout, tool.run(args, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::upstream(format!(
            "'{}' timed out after {}s",
            tool.name(),
            timeout.as_secs()
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request bundle handed to every tool call in a run.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The caller.
    pub user_id: UserId,
    /// Request time; tools use this instead of reading the clock.
    pub now: DateTime<Utc>,
    /// Persistence layer.
    pub store: Arc<Store>,
    /// Effective configuration.
    pub config: Arc<QuestlogConfig>,
    /// Token to check for cancellation.
    pub cancellation: CancellationToken,
    budget: Arc<RwLock<BudgetSnapshot>>,
}

impl ToolContext {
    pub fn new(
        user_id: UserId,
        now: DateTime<Utc>,
        store: Arc<Store>,
        config: Arc<QuestlogConfig>,
    ) -> Self {
        Self {
            user_id,
            now,
            store,
            config,
            cancellation: CancellationToken::new(),
            budget: Arc::new(RwLock::new(BudgetSnapshot::default())),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Budget counters as of the last completed step.
    pub fn budget(&self) -> BudgetSnapshot {
        *self.budget.read()
    }

    pub(crate) fn publish_budget(&self, snapshot: BudgetSnapshot) {
        *self.budget.write() = snapshot;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of tools, kept in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names and empty tag sets are rejected.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a tool from an Arc.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::Registry(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        if tool.tags().is_empty() {
            return Err(AgentError::Registry(format!("tool '{}' has no tags", name)));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Every tool whose tags intersect `tags`, in registration order.
    pub fn filter_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> ToolSet {
        let tools = self
            .tools
            .iter()
            .filter(|tool| {
                tool.tags()
                    .iter()
                    .any(|t| tags.iter().any(|wanted| wanted.as_ref() == *t))
            })
            .cloned()
            .collect();
        ToolSet { tools }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// The tools made available to one run.
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    /// The same set without tools that change stored data.
    pub fn read_only(self) -> ToolSet {
        let tools = self.tools.into_iter().filter(|t| !t.mutating()).collect();
        ToolSet { tools }
    }

    /// Tool schemas in the order they are offered to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition::new(tool.name(), tool.description(), tool.parameters()))
            .collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
