//! Stream elements — the unit flowing through the duplex pipeline.
//!
//! A [`StreamElement`] carries at most one payload (audio frame, text
//! fragment, message, tool-call batch, end-of-stream marker, or error)
//! plus a free-form metadata map used for turn correlation
//! (`turn_id`), prompt injection (`system_prompt`), store routing
//! (`conversation_id`), and the end-of-run sentinel
//! (`all_responses_received`).

use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;
use crate::message::Message;
use crate::tool::ToolCall;
use crate::Metadata;

/// Well-known element metadata keys.
pub mod meta {
    pub const TURN_ID: &str = "turn_id";
    pub const SYSTEM_PROMPT: &str = "system_prompt";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const ALL_RESPONSES_RECEIVED: &str = "all_responses_received";
    /// Set on error elements produced when the provider session closes.
    pub const SESSION_ENDED: &str = "session_ended";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementPayload {
    Audio { frame: AudioFrame },
    Text { text: String },
    Message { message: Box<Message> },
    ToolCalls { calls: Vec<ToolCall> },
    EndOfStream,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamElement {
    pub payload: ElementPayload,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl StreamElement {
    fn new(payload: ElementPayload) -> Self {
        Self {
            payload,
            metadata: Metadata::new(),
        }
    }

    pub fn audio(frame: AudioFrame) -> Self {
        Self::new(ElementPayload::Audio { frame })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ElementPayload::Text { text: text.into() })
    }

    pub fn message(message: Message) -> Self {
        Self::new(ElementPayload::Message {
            message: Box::new(message),
        })
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::new(ElementPayload::ToolCalls { calls })
    }

    pub fn end_of_stream() -> Self {
        Self::new(ElementPayload::EndOfStream)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ElementPayload::Error {
            message: message.into(),
        })
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_turn_id(self, turn_id: &str) -> Self {
        self.with_meta(meta::TURN_ID, serde_json::Value::String(turn_id.into()))
    }

    pub fn with_conversation_id(self, conversation_id: &str) -> Self {
        self.with_meta(
            meta::CONVERSATION_ID,
            serde_json::Value::String(conversation_id.into()),
        )
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.meta_str(meta::TURN_ID)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.meta_str(meta::SYSTEM_PROMPT)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.meta_str(meta::CONVERSATION_ID)
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.payload, ElementPayload::EndOfStream)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ElementPayload::Error { .. })
    }

    /// Whether this element is the end-of-run sentinel emitted after the
    /// last turn.
    pub fn is_all_responses_received(&self) -> bool {
        self.meta_bool(meta::ALL_RESPONSES_RECEIVED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accessors() {
        let el = StreamElement::text("hello")
            .with_turn_id("t-1")
            .with_conversation_id("c-1")
            .with_meta(meta::SYSTEM_PROMPT, serde_json::json!("be brief"));
        assert_eq!(el.turn_id(), Some("t-1"));
        assert_eq!(el.conversation_id(), Some("c-1"));
        assert_eq!(el.system_prompt(), Some("be brief"));
        assert!(!el.is_end_of_stream());
    }

    #[test]
    fn sentinel_flag() {
        let el = StreamElement::end_of_stream()
            .with_meta(meta::ALL_RESPONSES_RECEIVED, serde_json::json!(true));
        assert!(el.is_end_of_stream());
        assert!(el.is_all_responses_received());
        assert!(!StreamElement::end_of_stream().is_all_responses_received());
    }

    #[test]
    fn serde_round_trip() {
        let el = StreamElement::audio(crate::audio::AudioFrame::pcm16(vec![1, 2, 3, 4]))
            .with_turn_id("t-9");
        let json = serde_json::to_string(&el).unwrap();
        let back: StreamElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_id(), Some("t-9"));
        match back.payload {
            ElementPayload::Audio { frame } => assert_eq!(frame.data, vec![1, 2, 3, 4]),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
