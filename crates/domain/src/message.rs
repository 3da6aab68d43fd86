//! Conversation messages.
//!
//! A [`Message`] is the unit the state store persists: role + text content,
//! optional structured parts (text or media), optional tool calls / tool
//! result, timestamps, latency, a cost breakdown, and a free-form metadata
//! map carrying assertion results, workflow state, persona, and turn
//! correlation IDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResultPayload};
use crate::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// An ordered piece of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    /// Media payload: either inline bytes or an externalized file
    /// reference (exactly one of `data` / `path` is set after the media
    /// externalizer has run).
    #[serde(rename = "media")]
    Media {
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_bytes: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
}

/// Token counts and derived dollar cost for one provider exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    /// Accumulate another breakdown into this one.
    pub fn add(&mut self, other: &CostBreakdown) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
        self.total_cost += other.total_cost;
    }
}

/// Metadata key under which per-turn assertion outcomes are stored on the
/// evaluated assistant message.
pub const META_ASSERTIONS: &str = "assertions";
/// Metadata key correlating a message with the duplex turn that produced it.
pub const META_TURN_ID: &str = "turn_id";
/// Metadata key carrying the persona that generated a self-play message.
pub const META_PERSONA: &str = "persona";
/// Metadata key under which a recorded cost breakdown may appear when the
/// recording format did not map it onto [`Message::cost`].
pub const META_COST: &str = "cost";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Ordered content parts; `None` for plain-text messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<ContentPart>>,

    /// Tool calls requested by an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool result carried by a tool-role message. Invariant: references
    /// the call ID of a prior assistant tool call on the same conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultPayload>,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: None,
            tool_calls: None,
            tool_result: None,
            timestamp: Utc::now(),
            latency_ms: None,
            cost: None,
            metadata: Metadata::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let content = content.into();
        let payload = ToolResultPayload {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.clone(),
            is_error,
        };
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_result = Some(payload);
        msg
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        if !calls.is_empty() {
            self.tool_calls = Some(calls);
        }
        self
    }

    pub fn with_cost(mut self, cost: CostBreakdown) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The effective cost of this message: the typed breakdown when set,
    /// otherwise a `cost` metadata object as recorded by an adapter.
    pub fn effective_cost(&self) -> Option<CostBreakdown> {
        if let Some(cost) = &self.cost {
            return Some(cost.clone());
        }
        self.metadata
            .get(META_COST)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.metadata.get(META_TURN_ID).and_then(|v| v.as_str())
    }
}
