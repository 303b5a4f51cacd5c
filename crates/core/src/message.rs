//! Turn and Transcript domain types.
//!
//! These are the value objects that flow through a conversation:
//! user submits text → a user turn is appended → the model streams a reply
//! → an assistant turn grows until the stream ends.

use serde::{Deserialize, Serialize};

/// The speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
}

impl Role {
    /// Speaker label used when rendering dialogue into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    /// Lowercase name, as used in summarization requests.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// The ordered sequence of turns for one conversation.
///
/// Turns are only appended, except for the assistant turn currently being
/// streamed (see [`Transcript::last_mut`]) and the wholesale replacements made
/// by history summarization or truncation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Mutable access to the newest turn, used while a reply streams in.
    pub fn last_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    pub fn pop(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    /// Every turn before the newest one. When the newest turn is the pending
    /// user message this is the history that precedes it.
    pub fn before_last(&self) -> &[Turn] {
        match self.turns.len() {
            0 => &[],
            n => &self.turns[..n - 1],
        }
    }

    /// Drop all but the newest `n` turns.
    pub fn keep_last(&mut self, n: usize) {
        if self.turns.len() > n {
            let start = self.turns.len() - n;
            self.turns.drain(..start);
        }
    }

    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
