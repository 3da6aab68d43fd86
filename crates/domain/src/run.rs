//! Run records — metadata, plan combinations, and the reconstructed
//! result view.
//!
//! [`RunMetadata`] is created with partial fields at run start and closed
//! at run end; [`RunResult`] is never stored, only reconstructed from the
//! state store at query time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::CostBreakdown;
use crate::scenario::AssertionOutcome;
use crate::state::MediaRecord;

/// Provider ID recorded for eval replays (no provider is invoked).
pub const EVAL_PROVIDER_ID: &str = "eval";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub region: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_id: Option<String>,

    /// Provider ID, or [`EVAL_PROVIDER_ID`] for replays.
    pub provider_id: String,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub self_play: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<String>,

    /// Conversation-level assertion results accumulated over the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_assertions: Vec<AssertionOutcome>,
}

impl RunMetadata {
    /// A partially-filled record at run start.
    pub fn started(
        run_id: impl Into<String>,
        region: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            region: region.into(),
            scenario_id: None,
            eval_id: None,
            provider_id: provider_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            error: None,
            self_play: false,
            persona: None,
            recording_path: None,
            conversation_assertions: Vec::new(),
        }
    }

    /// Close the record, stamping end time and duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan combinations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A reference to one prior session on disk or in a database, resolved
/// by the adapter registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingRef {
    /// The source expression the reference was enumerated from.
    pub source: String,
    /// Concrete path (or locator) of this recording.
    pub path: String,
    /// Adapter type hint (e.g. `"jsonl"`).
    pub adapter: String,
}

/// One element of the run plan: the Cartesian coordinate of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunCombination {
    Scenario {
        region: String,
        scenario_id: String,
        provider_id: String,
    },
    Eval {
        eval_id: String,
        recording: RecordingRef,
    },
}

impl RunCombination {
    /// Short label used in logs and RunID construction.
    pub fn label(&self) -> String {
        match self {
            RunCombination::Scenario {
                region,
                scenario_id,
                provider_id,
            } => format!("{region}/{scenario_id}/{provider_id}"),
            RunCombination::Eval { eval_id, recording } => {
                format!("eval/{eval_id}/{}", recording.path)
            }
        }
    }
}

/// Ordered list of combinations to execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPlan {
    pub combinations: Vec<RunCombination>,
}

impl RunPlan {
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation outcome & reconstructed result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a conversation executor hands back to the scheduler. The state
/// store remains the ground truth for messages and costs.
#[derive(Debug, Clone, Default)]
pub struct ConversationOutcome {
    pub conversation_id: String,
    pub failed: bool,
    pub error: Option<String>,
    pub completed_turns: usize,
    pub self_play: bool,
    pub persona: Option<String>,
    pub recording_path: Option<String>,
    pub conversation_assertions: Vec<AssertionOutcome>,
}

/// A failed assertion, located within the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Message index, or `None` for conversation-level assertions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_index: Option<usize>,
    pub assertion_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// View reconstructed from ConversationState + RunMetadata at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub metadata: RunMetadata,
    pub message_count: usize,
    /// Aggregated cost over all message cost breakdowns.
    pub cost: CostBreakdown,
    /// Tool name → invocation count.
    pub tool_usage: HashMap<String, u32>,
    pub violations: Vec<Violation>,
    pub media_outputs: Vec<MediaRecord>,
    pub assertions: AssertionSummary,
    pub failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_finish_stamps_duration() {
        let mut meta = RunMetadata::started("r1", "us", "p1");
        assert!(meta.ended_at.is_none());
        meta.finish();
        assert!(meta.ended_at.is_some());
        assert!(meta.duration_ms.is_some());
    }

    #[test]
    fn combination_labels() {
        let c = RunCombination::Scenario {
            region: "us".into(),
            scenario_id: "s1".into(),
            provider_id: "p1".into(),
        };
        assert_eq!(c.label(), "us/s1/p1");

        let c = RunCombination::Eval {
            eval_id: "e1".into(),
            recording: RecordingRef {
                source: "recordings/*.jsonl".into(),
                path: "recordings/a.jsonl".into(),
                adapter: "jsonl".into(),
            },
        };
        assert_eq!(c.label(), "eval/e1/recordings/a.jsonl");
    }
}
