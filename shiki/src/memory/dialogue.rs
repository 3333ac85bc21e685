//! Dialogue-scope message buffer.
//!
//! The optional outer chat layer: messages carry ids so a host application
//! can remove them (optionally cascading to everything after), a capacity
//! policy bounds both message count and estimated tokens, and
//! [`DialogueMemory::build_messages`] emits a provider prompt with the
//! system message prepended.

use uuid::Uuid;

use crate::message::{ContentPart, Message, Role, ToolOutput};

use super::estimate::estimate_message;
use super::working::{fix_discontinuous, truncate_text};

/// A buffered message with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueMessage {
    /// Buffer-unique id.
    pub id: String,
    /// The message.
    pub message: Message,
}

/// The outer chat buffer.
#[derive(Debug, Clone)]
pub struct DialogueMemory {
    system_prompt: String,
    messages: Vec<DialogueMessage>,
    max_messages: usize,
    max_tokens: u64,
    compress_max_length: Option<usize>,
}

impl DialogueMemory {
    /// Create a buffer with the given system prompt and default capacity.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            max_messages: 100,
            max_tokens: 128_000,
            compress_max_length: None,
        }
    }

    /// Set the capacity policy.
    #[must_use]
    pub const fn with_capacity(mut self, max_messages: usize, max_tokens: u64) -> Self {
        self.max_messages = max_messages;
        self.max_tokens = max_tokens;
        self
    }

    /// Truncate assistant text and tool string results to this length when
    /// buffering.
    #[must_use]
    pub const fn with_compress_max_length(mut self, length: usize) -> Self {
        self.compress_max_length = Some(length);
        self
    }

    /// Number of buffered messages (system excluded).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The buffered messages.
    #[must_use]
    pub fn get_messages(&self) -> &[DialogueMessage] {
        &self.messages
    }

    /// Append messages, returning their assigned ids. Applies the optional
    /// length compression, then enforces the capacity policy.
    pub fn add_messages(&mut self, messages: Vec<Message>) -> Vec<String> {
        let mut ids = Vec::with_capacity(messages.len());
        for mut message in messages {
            if let Some(limit) = self.compress_max_length {
                compress_message(&mut message, limit);
            }
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            self.messages.push(DialogueMessage { id, message });
        }
        self.enforce_capacity();
        ids
    }

    /// Remove a message by id. With `cascade`, everything after it is
    /// removed as well. Returns `true` if the id was found.
    pub fn remove_message_by_id(&mut self, id: &str, cascade: bool) -> bool {
        let Some(index) = self.messages.iter().position(|m| m.id == id) else {
            return false;
        };
        if cascade {
            self.messages.truncate(index);
        } else {
            self.messages.remove(index);
        }
        self.repair();
        true
    }

    /// Build the provider prompt: system message plus the buffer.
    #[must_use]
    pub fn build_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(Message::system(&self.system_prompt));
        out.extend(self.messages.iter().map(|m| m.message.clone()));
        out
    }

    /// Drop all buffered messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn enforce_capacity(&mut self) {
        while self.messages.len() > self.max_messages
            || (self.estimated_tokens() > self.max_tokens && !self.messages.is_empty())
        {
            self.messages.remove(0);
        }
        self.repair();
    }

    fn estimated_tokens(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| estimate_message(&m.message))
            .sum()
    }

    fn repair(&mut self) {
        let mut plain: Vec<Message> = self.messages.iter().map(|m| m.message.clone()).collect();
        fix_discontinuous(&mut plain);
        // Re-associate surviving messages with their ids in order.
        let mut repaired = Vec::with_capacity(plain.len());
        let mut source = self.messages.drain(..).collect::<Vec<_>>().into_iter();
        for message in plain {
            let id = source
                .by_ref()
                .find(|m| m.message == message)
                .map_or_else(|| Uuid::new_v4().to_string(), |m| m.id);
            repaired.push(DialogueMessage { id, message });
        }
        self.messages = repaired;
    }
}

fn compress_message(message: &mut Message, limit: usize) {
    match message.role {
        Role::Assistant => {
            if let Some(parts) = message.parts_mut() {
                for part in parts.iter_mut() {
                    if let ContentPart::Text { text } = part {
                        if text.chars().count() > limit {
                            *text = truncate_text(text, limit);
                        }
                    }
                }
            }
        }
        Role::Tool => {
            if let Some(results) = message.tool_results_mut() {
                for result in results.iter_mut() {
                    match &mut result.output {
                        ToolOutput::Text { value } | ToolOutput::ErrorText { value } => {
                            if value.chars().count() > limit {
                                *value = truncate_text(value, limit);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Role::System | Role::User => {}
    }
}
