//! Conversation history with transactional turn semantics.
//!
//! The history is the literal prompt context sent to the language model, so
//! insertion order is significant. It is mutated only by the generation
//! worker; no locking is needed.

use serde::Serialize;

/// Speaker role for a history entry. Serializes to the lowercase names the
/// chat API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the dialogue context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered, append-only (with rollback) message log for one conversation.
///
/// Invariants: at most one `System` message, always first if present; only
/// [`rollback_last_user`](Self::rollback_last_user) ever removes an entry,
/// and only the most recent append.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Creates an empty history with no system prompt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a history seeded with a system prompt. A prompt that is empty
    /// after trimming is ignored.
    pub fn with_system(prompt: &str) -> Self {
        let mut history = Self::new();
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            history.messages.push(Message::new(Role::System, prompt));
        }
        history
    }

    /// Starts a turn by appending the user message.
    ///
    /// The caller guarantees `text` is non-empty after trimming; the pipeline
    /// filters empty input before it reaches the history.
    pub fn begin_turn(&mut self, text: &str) {
        self.messages.push(Message::new(Role::User, text));
    }

    /// Appends the assistant reply, unless it is empty after trimming.
    /// A failed or empty generation leaves no assistant entry.
    pub fn commit_assistant(&mut self, text: &str) {
        if !text.trim().is_empty() {
            self.messages.push(Message::new(Role::Assistant, text));
        }
    }

    /// Removes the most recently appended user message, so a retried turn
    /// does not duplicate context after a failed generation. No-op if the
    /// last entry is not a user message.
    pub fn rollback_last_user(&mut self) {
        if self.messages.last().is_some_and(|m| m.role == Role::User) {
            self.messages.pop();
        }
    }

    /// Clears all messages except the original system message, if any.
    pub fn reset(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// The ordered message list, as sent to the model.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
