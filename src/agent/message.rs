//! Conversation types

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Append-only conversation log owned by one agent.
///
/// The provider keeps no server-side memory, so the full log is replayed as
/// history on every call. With a limit set, the oldest turns are evicted first.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    limit: Option<usize>,
}

impl Conversation {
    /// Create an unbounded conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation that keeps at most `limit` turns
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            turns: VecDeque::new(),
            limit,
        }
    }

    /// Append a turn, evicting the oldest turns if over the limit
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        if let Some(limit) = self.limit {
            while self.turns.len() > limit {
                self.turns.pop_front();
            }
        }
    }

    /// Snapshot of all turns, oldest first
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Drop every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::user("Hello");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text, "Hello");
        assert_eq!(Turn::assistant("Hi").role, Role::Assistant);
    }

    #[test]
    fn test_conversation_keeps_order() {
        let mut conversation = Conversation::new();
        conversation.push(Turn::user("one"));
        conversation.push(Turn::assistant("two"));
        conversation.push(Turn::user("three"));

        let texts: Vec<_> = conversation.turns().into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_conversation_limit_evicts_oldest() {
        let mut conversation = Conversation::with_limit(Some(2));
        for i in 0..5 {
            conversation.push(Turn::user(format!("Message {}", i)));
        }

        let turns = conversation.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "Message 3");
        assert_eq!(turns[1].text, "Message 4");
    }
}
