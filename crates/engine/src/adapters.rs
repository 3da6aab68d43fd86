//! Recording adapters — reading prior sessions for eval replays.
//!
//! The registry dispatches on an adapter type hint and expands glob
//! sources into concrete recording references. The built-in JSONL
//! adapter reads transcript-style line-delimited files (one message per
//! line).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use arena_domain::error::{Error, Result};
use arena_domain::message::{CostBreakdown, Message, Role};
use arena_domain::run::RecordingRef;
use arena_domain::tool::ToolCall;
use arena_domain::Metadata;

pub trait RecordingAdapter: Send + Sync {
    /// Adapter type hint this adapter serves (e.g. `"jsonl"`).
    fn kind(&self) -> &str;

    /// Expand a source expression (path or glob) into references.
    fn enumerate(&self, source: &str) -> Result<Vec<RecordingRef>>;

    /// Load messages and conversation metadata for one reference.
    fn load(&self, reference: &RecordingRef) -> Result<(Vec<Message>, Metadata)>;
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn RecordingAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in adapters registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(JsonlAdapter));
        registry
    }

    pub fn register(&self, adapter: Arc<dyn RecordingAdapter>) {
        self.adapters
            .write()
            .insert(adapter.kind().to_owned(), adapter);
    }

    fn adapter(&self, kind: &str) -> Result<Arc<dyn RecordingAdapter>> {
        self.adapters
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::Adapter(format!("no adapter registered for {kind:?}")))
    }

    pub fn enumerate(&self, source: &str, type_hint: &str) -> Result<Vec<RecordingRef>> {
        self.adapter(type_hint)?.enumerate(source)
    }

    pub fn load(&self, reference: &RecordingRef) -> Result<(Vec<Message>, Metadata)> {
        self.adapter(&reference.adapter)?.load(reference)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of a JSONL recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordingLine {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    cost: Option<CostBreakdown>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

pub struct JsonlAdapter;

impl JsonlAdapter {
    fn parse_role(role: &str) -> Option<Role> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    fn line_to_message(line: RecordingLine) -> Option<Message> {
        let role = Self::parse_role(&line.role)?;
        let mut message = match role {
            Role::System => Message::system(line.content),
            Role::User => Message::user(line.content),
            Role::Assistant => Message::assistant(line.content),
            Role::Tool => {
                let mut m = Message::user(line.content);
                m.role = Role::Tool;
                m
            }
        };
        if let Some(metadata) = line.metadata {
            message.metadata = metadata;
        }
        if let Some(cost) = line.cost {
            message.cost = Some(cost);
        }
        if let Some(calls) = line.tool_calls {
            message = message.with_tool_calls(calls);
        }
        if let Some(ts) = line.timestamp {
            message.timestamp = ts;
        }
        Some(message)
    }
}

impl RecordingAdapter for JsonlAdapter {
    fn kind(&self) -> &str {
        "jsonl"
    }

    fn enumerate(&self, source: &str) -> Result<Vec<RecordingRef>> {
        let make_ref = |path: String| RecordingRef {
            source: source.to_owned(),
            path,
            adapter: self.kind().to_owned(),
        };

        if source.contains('*') || source.contains('?') || source.contains('[') {
            let mut paths: Vec<String> = glob::glob(source)
                .map_err(|e| Error::Adapter(format!("bad glob {source:?}: {e}")))?
                .filter_map(|entry| entry.ok())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            paths.sort();
            Ok(paths.into_iter().map(make_ref).collect())
        } else {
            if !Path::new(source).exists() {
                return Err(Error::Adapter(format!("recording not found: {source}")));
            }
            Ok(vec![make_ref(source.to_owned())])
        }
    }

    fn load(&self, reference: &RecordingRef) -> Result<(Vec<Message>, Metadata)> {
        let raw = std::fs::read_to_string(&reference.path).map_err(Error::Io)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordingLine>(line) {
                Ok(parsed) => match Self::line_to_message(parsed) {
                    Some(message) => messages.push(message),
                    None => {
                        tracing::warn!(path = %reference.path, "skipping line with unknown role");
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %reference.path,
                        error = %e,
                        "skipping malformed recording line"
                    );
                }
            }
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            "recording_path".into(),
            serde_json::json!(reference.path.clone()),
        );
        Ok((messages, metadata))
    }
}
