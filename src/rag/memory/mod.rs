
use std::fmt::Write as _;

/// Rendered in place of an empty history
pub const EMPTY_HISTORY: &str = "None.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    #[inline]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered record of one chat session.
///
/// Turns are never evicted; `render` decides how many reach the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    #[inline]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Serialize the most recent `max_turns` turns, oldest first
    #[inline]
    pub fn render(&self, max_turns: usize) -> String {
        let skip = self.turns.len().saturating_sub(max_turns);
        let mut rendered = String::new();

        for turn in self.turns.iter().skip(skip) {
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            // Writing to a String cannot fail
            let _ = write!(rendered, "User: {}\nAssistant: {}", turn.question, turn.answer);
        }

        if rendered.is_empty() {
            EMPTY_HISTORY.to_string()
        } else {
            rendered
        }
    }
}
