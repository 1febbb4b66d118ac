//! Conversation history
//!
//! Ordered messages carried across `run` calls so follow-up prompts keep
//! their context. The system prompt is not stored here; the agent prepends it
//! to every request, so it can change between runs without rewriting history.

use crate::llm::{Message, MessageRole};

/// Rough estimate: 1 token ≈ 4 characters
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for role and structure
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop everything after the first `len` messages
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// The request payload: system prompt followed by the history
    pub fn with_system(&self, system_prompt: &str) -> Vec<Message> {
        let mut request = Vec::with_capacity(self.messages.len() + 1);
        if !system_prompt.is_empty() {
            request.push(Message::system(system_prompt));
        }
        request.extend(self.messages.iter().cloned());
        request
    }

    /// Number of user prompts in the history
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count()
    }

    /// Approximate token size of the history
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(estimate_tokens).sum()
    }
}

fn estimate_tokens(message: &Message) -> usize {
    let content = message.content.as_deref().map(str::len).unwrap_or(0);
    let calls: usize = message
        .calls()
        .iter()
        .map(|c| c.name.len() + c.arguments.len())
        .sum();
    let id = message.tool_call_id.as_deref().map(str::len).unwrap_or(0);
    (content + calls + id).div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD_TOKENS
}
