use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Bounded FIFO of turns. Oldest turns are dropped once `max_turns` is exceeded.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns + 2),
            max_turns,
        }
    }

    /// Appends a user/assistant pair, then enforces the bound
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.turns.push_back(Turn::user(question));
        self.turns.push_back(Turn::assistant(answer));
        self.enforce_bound();
    }

    fn enforce_bound(&mut self) {
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
