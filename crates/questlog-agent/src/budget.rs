//! Run budget: step, tool-call and token ceilings as one value object.
//!
//! The loop owns a [`Budget`], asks it before every model call whether the
//! run may continue, and records usage after each step. Tools only ever see
//! a [`BudgetSnapshot`].

use serde::{Deserialize, Serialize};

use questlog_config::AgentConfig;

use crate::error::{AgentError, Result};

/// Remaining total tokens at or below this count as exhausted.
pub const MIN_COMPLETION_TOKENS: u32 = 64;

/// Which ceiling stopped a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLimit {
    Steps,
    ToolCalls,
    TotalTokens,
    StepPrompt,
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Steps => "step ceiling reached",
            Self::ToolCalls => "tool-call ceiling reached",
            Self::TotalTokens => "total token budget exhausted",
            Self::StepPrompt => "prompt exceeds the per-step token cap",
        };
        f.write_str(s)
    }
}

/// Configured ceilings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub max_steps: u32,
    pub max_tool_calls: u32,
    pub max_step_prompt_tokens: u32,
    pub max_step_completion_tokens: u32,
    pub max_total_tokens: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for BudgetLimits {
    fn from(config: &AgentConfig) -> Self {
        let config = config.clone().clamped();
        Self {
            max_steps: config.max_steps,
            max_tool_calls: config.max_tool_calls,
            max_step_prompt_tokens: config.max_step_prompt_tokens,
            max_step_completion_tokens: config.max_step_completion_tokens,
            max_total_tokens: config.max_total_tokens,
        }
    }
}

/// Read-only view of a budget, handed to tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub steps_used: u32,
    pub max_steps: u32,
    pub tool_calls_used: u32,
    pub max_tool_calls: u32,
    pub tokens_used: u64,
    pub max_total_tokens: u32,
}

/// Counters for one run, checked against [`BudgetLimits`].
#[derive(Debug, Clone)]
pub struct Budget {
    limits: BudgetLimits,
    steps: u32,
    tool_calls: u32,
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl Budget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            steps: 0,
            tool_calls: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Whether another model call may be issued.
    pub fn check_step(&self) -> Result<()> {
        if self.steps >= self.limits.max_steps {
            return Err(AgentError::BudgetExceeded(BudgetLimit::Steps));
        }
        if self.remaining_tokens() <= u64::from(MIN_COMPLETION_TOKENS) {
            return Err(AgentError::BudgetExceeded(BudgetLimit::TotalTokens));
        }
        Ok(())
    }

    /// Whether an estimated prompt fits the per-step cap.
    pub fn check_prompt(&self, estimated_tokens: u32) -> Result<()> {
        if estimated_tokens > self.limits.max_step_prompt_tokens {
            return Err(AgentError::BudgetExceeded(BudgetLimit::StepPrompt));
        }
        Ok(())
    }

    /// Per-step prompt cap.
    pub fn prompt_cap(&self) -> u32 {
        self.limits.max_step_prompt_tokens
    }

    /// Completion tokens the next call may request.
    pub fn completion_allowance(&self) -> u32 {
        let remaining = u32::try_from(self.remaining_tokens()).unwrap_or(u32::MAX);
        self.limits.max_step_completion_tokens.min(remaining)
    }

    /// Whether tools may still be offered to the model.
    pub fn tools_available(&self) -> bool {
        self.tool_calls < self.limits.max_tool_calls
    }

    /// Claim one tool call. Fails once the ceiling is reached.
    pub fn claim_tool_call(&mut self) -> Result<()> {
        if !self.tools_available() {
            return Err(AgentError::BudgetExceeded(BudgetLimit::ToolCalls));
        }
        self.tool_calls += 1;
        Ok(())
    }

    /// Record one completed model call.
    pub fn record_step(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.steps += 1;
        self.prompt_tokens += u64::from(prompt_tokens);
        self.completion_tokens += u64::from(completion_tokens);
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn remaining_tokens(&self) -> u64 {
        u64::from(self.limits.max_total_tokens).saturating_sub(self.total_tokens())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            steps_used: self.steps,
            max_steps: self.limits.max_steps,
            tool_calls_used: self.tool_calls,
            max_tool_calls: self.limits.max_tool_calls,
            tokens_used: self.total_tokens(),
            max_total_tokens: self.limits.max_total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> BudgetLimits {
        BudgetLimits {
            max_steps: 2,
            max_tool_calls: 1,
            max_step_prompt_tokens: 100,
            max_step_completion_tokens: 50,
            max_total_tokens: 600,
        }
    }

    #[test]
    fn test_defaults_from_config() {
        let limits = BudgetLimits::default();
        assert_eq!(limits.max_steps, 6);
        assert_eq!(limits.max_tool_calls, 4);
        assert_eq!(limits.max_step_prompt_tokens, 1800);
        assert_eq!(limits.max_step_completion_tokens, 420);
        assert_eq!(limits.max_total_tokens, 6000);
    }

    #[test]
    fn test_step_ceiling() {
        let mut budget = Budget::new(limits());
        assert!(budget.check_step().is_ok());
        budget.record_step(10, 10);
        budget.record_step(10, 10);
        assert!(matches!(
            budget.check_step(),
            Err(AgentError::BudgetExceeded(BudgetLimit::Steps))
        ));
    }

    #[test]
    fn test_total_tokens_exhausted_near_zero() {
        let mut budget = Budget::new(BudgetLimits {
            max_steps: 10,
            ..limits()
        });
        budget.record_step(500, 36);
        assert_eq!(budget.remaining_tokens(), 64);
        assert!(matches!(
            budget.check_step(),
            Err(AgentError::BudgetExceeded(BudgetLimit::TotalTokens))
        ));
    }

    #[test]
    fn test_completion_allowance_shrinks_with_remaining() {
        let mut budget = Budget::new(limits());
        assert_eq!(budget.completion_allowance(), 50);
        budget.record_step(560, 10);
        assert_eq!(budget.completion_allowance(), 30);
    }

    #[test]
    fn test_tool_calls_claimed_up_to_ceiling() {
        let mut budget = Budget::new(limits());
        assert!(budget.tools_available());
        budget.claim_tool_call().unwrap();
        assert!(!budget.tools_available());
        assert!(budget.claim_tool_call().is_err());
        assert_eq!(budget.tool_calls(), 1);
    }

    #[test]
    fn test_prompt_cap() {
        let budget = Budget::new(limits());
        assert!(budget.check_prompt(100).is_ok());
        assert!(matches!(
            budget.check_prompt(101),
            Err(AgentError::BudgetExceeded(BudgetLimit::StepPrompt))
        ));
    }

    #[test]
    fn test_snapshot() {
        let mut budget = Budget::new(limits());
        budget.record_step(40, 2);
        budget.claim_tool_call().unwrap();
        let snap = budget.snapshot();
        assert_eq!(snap.steps_used, 1);
        assert_eq!(snap.tool_calls_used, 1);
        assert_eq!(snap.tokens_used, 42);
        assert_eq!(snap.max_total_tokens, 600);
    }
}
