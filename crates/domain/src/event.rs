//! Structured events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Metadata;

/// Event names published by the core.
pub mod names {
    pub const RUN_STARTED: &str = "arena.run.started";
    pub const RUN_COMPLETED: &str = "arena.run.completed";
    pub const RUN_FAILED: &str = "arena.run.failed";

    pub const TURN_STARTED: &str = "arena.turn.started";
    pub const TURN_COMPLETED: &str = "arena.turn.completed";
    pub const TURN_FAILED: &str = "arena.turn.failed";

    pub const DUPLEX_SESSION_STARTED: &str = "arena.duplex.session.started";
    pub const DUPLEX_SESSION_COMPLETED: &str = "arena.duplex.session.completed";
    pub const DUPLEX_SESSION_ERROR: &str = "arena.duplex.session.error";

    pub const DUPLEX_TURN_STARTED: &str = "arena.duplex.turn.started";
    pub const DUPLEX_TURN_COMPLETED: &str = "arena.duplex.turn.completed";
    pub const DUPLEX_TURN_FAILED: &str = "arena.duplex.turn.failed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub run_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub payload: Metadata,
}

impl Event {
    pub fn new(name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_id: run_id.into(),
            session_id: None,
            conversation_id: None,
            timestamp: Utc::now(),
            payload: Metadata::new(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}
