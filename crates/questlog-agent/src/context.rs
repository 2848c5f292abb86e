//! Transcript building for model requests.
//!
//! A [`Transcript`] holds everything a step sends besides the tool schemas:
//! the system text, prior conversation, the current question and the tool
//! exchanges of this run. It estimates its own size and drops whole items
//! when a step's prompt cap is exceeded.

use std::collections::VecDeque;

use questlog_llm::{ContentBlock, Message, ToolDefinition, ToolResultBlock};

// ─────────────────────────────────────────────────────────────────────────────
// Token Estimation Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Characters per token (rough estimate for English text).
const CHARS_PER_TOKEN: usize = 4;

/// Estimate token count for a character count. Never zero.
pub fn estimate_tokens_from_chars(chars: usize) -> u32 {
    u32::try_from((chars / CHARS_PER_TOKEN).max(1)).unwrap_or(u32::MAX)
}

/// Estimate token count for a string. Never zero.
pub fn estimate_tokens(text: &str) -> u32 {
    estimate_tokens_from_chars(text.chars().count())
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcript
// ─────────────────────────────────────────────────────────────────────────────

/// One model tool-call turn and the observations answering it.
#[derive(Debug, Clone)]
struct ToolExchange {
    request: Message,
    results: Message,
    call_ids: Vec<String>,
}

/// What an eviction removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evicted {
    HistoryTurn,
    ToolExchange,
}

/// Conversation state for one run.
#[derive(Debug, Clone)]
pub struct Transcript {
    system: String,
    history: VecDeque<Message>,
    question: Message,
    exchanges: VecDeque<ToolExchange>,
    max_exchanges: usize,
}

impl Transcript {
    pub fn new(system: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: VecDeque::new(),
            question: Message::user(question),
            exchanges: VecDeque::new(),
            max_exchanges: usize::MAX,
        }
    }

    /// Prior conversation, oldest first.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history.into();
        self
    }

    /// Keep at most this many tool exchanges.
    pub fn with_max_exchanges(mut self, max: usize) -> Self {
        self.max_exchanges = max.max(1);
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    /// Record a tool-call turn. The oldest exchange goes once the limit is
    /// exceeded.
    pub fn push_exchange(&mut self, request: Vec<ContentBlock>, results: Vec<ToolResultBlock>) {
        let call_ids = request
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        self.exchanges.push_back(ToolExchange {
            request: Message::assistant_blocks(request),
            results: Message::tool_results(results),
            call_ids,
        });
        while self.exchanges.len() > self.max_exchanges {
            self.exchanges.pop_front();
        }
    }

    /// Whether the result of this tool call is still part of the transcript.
    pub fn holds_call(&self, call_id: &str) -> bool {
        self.exchanges
            .iter()
            .any(|e| e.call_ids.iter().any(|id| id == call_id))
    }

    /// Messages in send order: history, question, then tool exchanges.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1 + self.exchanges.len() * 2);
        messages.extend(self.history.iter().cloned());
        messages.push(self.question.clone());
        for exchange in &self.exchanges {
            messages.push(exchange.request.clone());
            messages.push(exchange.results.clone());
        }
        messages
    }

    /// Estimated prompt tokens including the given tool schemas.
    pub fn estimate(&self, tools: &[ToolDefinition]) -> u32 {
        let mut chars = self.system.chars().count() + self.question.char_len();
        chars += self.history.iter().map(Message::char_len).sum::<usize>();
        chars += self
            .exchanges
            .iter()
            .map(|e| e.request.char_len() + e.results.char_len())
            .sum::<usize>();
        chars += tools
            .iter()
            .map(|t| serde_json::to_string(t).map(|s| s.chars().count()).unwrap_or(0))
            .sum::<usize>();
        estimate_tokens_from_chars(chars)
    }

    /// Drop the oldest history turn, or failing that the oldest tool
    /// exchange. The system text and the question are never dropped.
    pub fn evict_one(&mut self) -> Option<Evicted> {
        if self.history.pop_front().is_some() {
            return Some(Evicted::HistoryTurn);
        }
        if self.exchanges.pop_front().is_some() {
            return Some(Evicted::ToolExchange);
        }
        None
    }

    /// Evict until the estimate fits `cap`. Returns the final estimate and
    /// whether it fits.
    pub fn fit(&mut self, cap: u32, tools: &[ToolDefinition]) -> (u32, bool) {
        loop {
            let estimate = self.estimate(tools);
            if estimate <= cap {
                return (estimate, true);
            }
            if self.evict_one().is_none() {
                return (estimate, false);
            }
        }
    }
}
