//! Conversation types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persona instruction placed at the start of every conversation.
pub const SYSTEM_PROMPT: &str = "You are a compassionate mental health companion. Provide:
1. Empathetic, non-judgmental responses
2. General coping strategies (e.g., breathing exercises)
3. NEVER give medical advice
4. Always suggest consulting a professional";

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single turn in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Rejected history mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("system turn may only appear at the start of a conversation")]
    SystemTurnNotAllowed,

    #[error("assistant turn must follow a user turn")]
    AssistantWithoutUser,
}

/// Ordered conversation turns, seeded with exactly one system turn.
///
/// Assistant turns may only follow user turns. A user turn may follow another
/// user turn: a failed exchange keeps its user turn, and the next message is
/// appended after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    #[serde(skip)]
    max_turns: Option<usize>,
}

impl ConversationHistory {
    /// New history seeded with `system_prompt`.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
            max_turns: None,
        }
    }

    /// Keep at most `max_turns` non-system turns, evicting the oldest first.
    pub fn with_max_turns(mut self, max_turns: Option<usize>) -> Self {
        self.max_turns = max_turns;
        self.truncate();
        self
    }

    /// Append a turn, enforcing ordering and the truncation policy.
    pub fn push(&mut self, turn: ConversationTurn) -> Result<(), HistoryError> {
        match turn.role {
            Role::System => return Err(HistoryError::SystemTurnNotAllowed),
            Role::Assistant if self.last_role() != Role::User => {
                return Err(HistoryError::AssistantWithoutUser);
            }
            _ => {}
        }

        self.turns.push(turn);
        self.truncate();
        Ok(())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Total turns including the system turn.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when only the system turn is present.
    pub fn is_empty(&self) -> bool {
        self.turns.len() <= 1
    }

    pub fn last_role(&self) -> Role {
        self.turns.last().map_or(Role::System, ConversationTurn::role)
    }

    // Drops from index 1 until the limit holds and the oldest kept turn is a
    // user turn, so the history never opens with an orphaned assistant reply.
    fn truncate(&mut self) {
        let Some(max_turns) = self.max_turns else {
            return;
        };

        let mut drop_count = self.turns.len().saturating_sub(1 + max_turns);
        while 1 + drop_count < self.turns.len()
            && self.turns[1 + drop_count].role == Role::Assistant
        {
            drop_count += 1;
        }

        if drop_count > 0 {
            self.turns.drain(1..1 + drop_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_history_holds_only_system_turn() {
        let history = ConversationHistory::new(SYSTEM_PROMPT);
        assert_eq!(history.len(), 1);
        assert!(history.is_empty());
        assert_eq!(history.turns()[0].role(), Role::System);
        assert_eq!(history.turns()[0].content(), SYSTEM_PROMPT);
    }

    #[test]
    fn exchanges_alternate() {
        let mut history = ConversationHistory::new("sys");
        for i in 0..3 {
            history.push(ConversationTurn::user(format!("q{i}"))).unwrap();
            history
                .push(ConversationTurn::assistant(format!("a{i}")))
                .unwrap();
        }

        assert_eq!(history.len(), 7);
        let roles: Vec<Role> = history.turns().iter().map(ConversationTurn::role).collect();
        assert_eq!(roles[0], Role::System);
        for pair in roles[1..].chunks(2) {
            assert_eq!(pair, [Role::User, Role::Assistant]);
        }
    }

    #[test]
    fn rejects_second_system_turn() {
        let mut history = ConversationHistory::new("sys");
        assert_eq!(
            history.push(ConversationTurn::system("again")),
            Err(HistoryError::SystemTurnNotAllowed)
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rejects_assistant_without_user() {
        let mut history = ConversationHistory::new("sys");
        assert_eq!(
            history.push(ConversationTurn::assistant("hi")),
            Err(HistoryError::AssistantWithoutUser)
        );

        history.push(ConversationTurn::user("hello")).unwrap();
        history.push(ConversationTurn::assistant("hi")).unwrap();
        assert_eq!(
            history.push(ConversationTurn::assistant("hi again")),
            Err(HistoryError::AssistantWithoutUser)
        );
    }

    #[test]
    fn user_turn_survives_failed_exchange() {
        let mut history = ConversationHistory::new("sys");
        history.push(ConversationTurn::user("first, unanswered")).unwrap();
        history.push(ConversationTurn::user("second")).unwrap();
        history.push(ConversationTurn::assistant("reply")).unwrap();
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn truncation_keeps_system_turn_and_recent_exchanges() {
        let mut history = ConversationHistory::new("sys").with_max_turns(Some(4));
        for i in 0..5 {
            history.push(ConversationTurn::user(format!("q{i}"))).unwrap();
            history
                .push(ConversationTurn::assistant(format!("a{i}")))
                .unwrap();
        }

        let contents: Vec<&str> = history.turns().iter().map(ConversationTurn::content).collect();
        assert_eq!(contents, vec!["sys", "q3", "a3", "q4", "a4"]);
    }

    #[test]
    fn truncation_never_leaves_leading_assistant_turn() {
        let mut history = ConversationHistory::new("sys").with_max_turns(Some(3));
        history.push(ConversationTurn::user("q0")).unwrap();
        history.push(ConversationTurn::assistant("a0")).unwrap();
        history.push(ConversationTurn::user("q1")).unwrap();
        history.push(ConversationTurn::assistant("a1")).unwrap();

        // q0 is evicted; a0 would then lead, so it goes too
        let contents: Vec<&str> = history.turns().iter().map(ConversationTurn::content).collect();
        assert_eq!(contents, vec!["sys", "q1", "a1"]);
    }

    #[test]
    fn turns_serialize_as_role_content_pairs() {
        let json = serde_json::to_value(ConversationTurn::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hello" }));
    }
}
