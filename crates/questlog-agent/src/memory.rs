//! Bounded conversation window for coach mode.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use questlog_llm::Message;
use questlog_store::{StoredTurn, TurnRole};

use crate::context::truncate_chars;

/// One turn of a coach conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl From<StoredTurn> for ConversationTurn {
    fn from(turn: StoredTurn) -> Self {
        Self {
            role: turn.role,
            text: turn.content,
            at: turn.created_at,
        }
    }
}

/// Fixed-size FIFO of recent turns. The oldest turn is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    capacity: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Window over stored turns (oldest first), keeping the newest ones.
    pub fn from_turns(capacity: usize, turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        let mut window = Self::new(capacity);
        for turn in turns {
            window.push(turn);
        }
        window
    }

    /// Append a turn, returning the evicted one if the window overflowed.
    pub fn push(&mut self, turn: ConversationTurn) -> Option<ConversationTurn> {
        if self.capacity == 0 {
            return Some(turn);
        }
        self.turns.push_back(turn);
        if self.turns.len() > self.capacity {
            self.turns.pop_front()
        } else {
            None
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Turns as model messages, each truncated to `max_chars`.
    pub fn to_messages(&self, max_chars: usize) -> Vec<Message> {
        self.turns
            .iter()
            .map(|turn| {
                let text = truncate_chars(&turn.text, max_chars);
                match turn.role {
                    TurnRole::User => Message::user(text),
                    TurnRole::Assistant => Message::assistant(text),
                }
            })
            .collect()
    }
}
