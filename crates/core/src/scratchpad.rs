//! Append-only turn history for a single run.
//!
//! The scratchpad is the model's working context: the user question followed
//! by every agent decision and tool observation, in order.

use crate::event::{ConversationTurn, Role, TurnId};

/// Ordered, append-only sequence of turns.
#[derive(Debug, Default)]
pub struct Scratchpad {
    turns: Vec<ConversationTurn>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Seed a scratchpad with the user's message.
    pub fn with_question(question: impl Into<String>) -> Self {
        let mut pad = Self::new();
        pad.push(ConversationTurn::user(question));
        pad
    }

    /// Append a turn. Turns are never mutated after this.
    pub fn push(&mut self, turn: ConversationTurn) -> TurnId {
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    /// Get the full turn history.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The first user turn.
    pub fn question(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Thought of the most recent tool-calling agent turn.
    pub fn last_thought(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter_map(|t| t.tool_call.as_ref())
            .map(|intent| intent.thought.as_str())
            .find(|thought| !thought.trim().is_empty())
    }

    /// Render agent and tool turns in `Thought/Action/Observation` form.
    pub fn render_react(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            match turn.role {
                Role::User => {}
                Role::Agent => {
                    out.push_str(&turn.content);
                    out.push('\n');
                }
                Role::Tool => {
                    out.push_str("Observation: ");
                    out.push_str(&turn.content);
                    out.push_str("\nThought: ");
                }
            }
        }
        out
    }

    /// Number of turns in the scratchpad.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if scratchpad is empty.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
