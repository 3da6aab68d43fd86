//! Conversation state — the per-run record the state store owns.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};
use crate::Metadata;

/// Where an externalized media part landed on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Index of the carrying message within `messages`.
    pub message_index: usize,
    /// Index of the part within the message.
    pub part_index: usize,
    pub path: String,
    pub media_type: String,
    pub size_bytes: usize,
    pub sha256: String,
}

/// Append-only per-run conversation record. The conversation ID equals
/// the run ID for harness runs. Mutation is limited to appending
/// messages and in-place enrichment of the latest assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRecord>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            metadata: Metadata::new(),
            media: Vec::new(),
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Whether a system message has been materialised yet.
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn last_assistant_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    pub fn assistant_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_assistant_finds_latest() {
        let mut state = ConversationState::new("c1", "tester");
        state.push_message(Message::user("q1"));
        state.push_message(Message::assistant("a1"));
        state.push_message(Message::user("q2"));
        state.push_message(Message::assistant("a2"));
        assert_eq!(state.last_assistant().unwrap().content, "a2");
        assert_eq!(state.assistant_messages().count(), 2);
    }

    #[test]
    fn system_message_detection() {
        let mut state = ConversationState::new("c1", "tester");
        assert!(!state.has_system_message());
        state.push_message(Message::system("be helpful"));
        assert!(state.has_system_message());
    }
}
