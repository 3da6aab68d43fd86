//! Scenario, eval, and assertion configuration.
//!
//! These are the pre-validated declarative inputs the engine consumes: a
//! [`Scenario`] describes a conversation (turns, personas, optional duplex
//! config, provider constraints); an [`EvalSpec`] describes a replay of a
//! recording with assertions; [`EvalDefConfig`] declares pack-level eval
//! handlers and their triggers.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Metadata;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assertions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Contains,
    ContainsAny,
    NotContains,
    RegexMatch,
    MinLength,
}

impl AssertionKind {
    /// The wire name, as stored in `AssertionOutcome::assertion_type`.
    pub fn name(&self) -> &'static str {
        match self {
            AssertionKind::Contains => "contains",
            AssertionKind::ContainsAny => "contains_any",
            AssertionKind::NotContains => "not_contains",
            AssertionKind::RegexMatch => "regex_match",
            AssertionKind::MinLength => "min_length",
        }
    }
}

/// A named predicate over a message or a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionConfig {
    #[serde(rename = "type")]
    pub kind: AssertionKind,

    /// Needles for the contains family, or the pattern for `regex_match`
    /// (first entry).
    #[serde(default)]
    pub values: Vec<String>,

    /// Minimum character count for `min_length`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
}

impl AssertionConfig {
    pub fn contains_any(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: AssertionKind::ContainsAny,
            values: values.into_iter().map(Into::into).collect(),
            min_length: None,
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            kind: AssertionKind::Contains,
            values: vec![value.into()],
            min_length: None,
        }
    }
}

/// Structured pass/fail record produced by evaluating an assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub assertion_type: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One declared turn of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSpec {
    /// `"user"` for scripted turns; any other role names a self-play
    /// speaker (e.g. `"attacker"`).
    #[serde(default = "d_user")]
    pub role: String,

    /// Scripted content (user turns) or the seed utterance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Persona for self-play turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Audio file for duplex user turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<PathBuf>,

    /// Repetition count for self-play roles. `0` means one iteration.
    #[serde(default)]
    pub turns: u32,

    /// Assertions applied to the latest assistant message after the turn.
    #[serde(default)]
    pub assertions: Vec<AssertionConfig>,
}

impl TurnSpec {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: d_user(),
            content: Some(content.into()),
            persona: None,
            audio_file: None,
            turns: 0,
            assertions: Vec::new(),
        }
    }

    pub fn self_play(role: impl Into<String>, persona: impl Into<String>, turns: u32) -> Self {
        Self {
            role: role.into(),
            content: None,
            persona: Some(persona.into()),
            audio_file: None,
            turns,
            assertions: Vec::new(),
        }
    }

    pub fn is_self_play(&self) -> bool {
        self.persona.is_some()
    }

    /// Effective iteration count (`turns: 0` executes once).
    pub fn iterations(&self) -> u32 {
        self.turns.max(1)
    }
}

/// Turn segmentation strategy for duplex audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetection {
    /// Harness-side voice-activity detection (the default).
    #[default]
    Vad,
    /// The provider segments turns itself.
    Provider,
}

/// Voice-activity-detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "d_silence_ms")]
    pub silence_duration_ms: u64,
    #[serde(default = "d_min_speech_ms")]
    pub min_speech_duration_ms: u64,
    #[serde(default = "d_max_turn_ms")]
    pub max_turn_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_duration_ms: d_silence_ms(),
            min_speech_duration_ms: d_min_speech_ms(),
            max_turn_duration_ms: d_max_turn_ms(),
        }
    }
}

/// Configuration for a bidirectional real-time audio session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexConfig {
    /// Overall session deadline.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub turn_detection: TurnDetection,

    #[serde(default)]
    pub vad: VadConfig,

    /// Delay between turns so the provider can finalise its response.
    #[serde(default = "d_inter_turn_ms")]
    pub inter_turn_delay_ms: u64,

    /// Delay after self-play turns (TTS audio tends to need longer).
    #[serde(default = "d_self_play_delay_ms")]
    pub self_play_delay_ms: u64,

    /// Treat a session-end on the last turn of the last iteration as
    /// success, provided at least one turn completed.
    #[serde(default)]
    pub ignore_last_turn_session_end: bool,

    /// Minimum completed turns for a mid-run session-end to count as
    /// partial success. `0` accepts any partial.
    #[serde(default)]
    pub partial_success_min_turns: u32,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout_secs(),
            turn_detection: TurnDetection::default(),
            vad: VadConfig::default(),
            inter_turn_delay_ms: d_inter_turn_ms(),
            self_play_delay_ms: d_self_play_delay_ms(),
            ignore_last_turn_session_end: false,
            partial_success_min_turns: 0,
        }
    }
}

/// Declarative specification of a conversation under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,

    /// Task type resolved against the prompt registry.
    #[serde(default = "d_task_type")]
    pub task_type: String,

    /// Explicit provider IDs; empty means resolve by group.
    #[serde(default)]
    pub providers: Vec<String>,

    /// Provider group used when `providers` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_group: Option<String>,

    /// Capabilities every resolved provider must advertise.
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// `{{variable}}` substitutions for prompts and scripted content.
    #[serde(default)]
    pub prompt_variables: HashMap<String, String>,

    #[serde(default)]
    pub turns: Vec<TurnSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplex: Option<DuplexConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Conversation-level assertions applied to the whole history.
    #[serde(default)]
    pub assertions: Vec<AssertionConfig>,
}

impl Scenario {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: d_task_type(),
            providers: Vec::new(),
            provider_group: None,
            required_capabilities: Vec::new(),
            prompt_variables: HashMap::new(),
            turns: Vec::new(),
            duplex: None,
            temperature: None,
            max_tokens: None,
            seed: None,
            assertions: Vec::new(),
        }
    }

    /// Whether any turn uses a self-play persona.
    pub fn has_self_play(&self) -> bool {
        self.turns.iter().any(TurnSpec::is_self_play)
    }

    /// First persona declared by a self-play turn, if any.
    pub fn first_persona(&self) -> Option<&str> {
        self.turns
            .iter()
            .find_map(|t| t.persona.as_deref())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative replay of a recording with assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSpec {
    pub id: String,

    /// Recording source: a path or a glob handed to the adapter registry.
    pub recording: String,

    /// Adapter type hint (default: JSONL transcripts).
    #[serde(default = "d_adapter")]
    pub adapter: String,

    /// Applied to every assistant message in the recording.
    #[serde(default)]
    pub turn_assertions: Vec<AssertionConfig>,

    /// Applied once against the whole history.
    #[serde(default)]
    pub conversation_assertions: Vec<AssertionConfig>,

    /// Also run the pack hook's session-level evals.
    #[serde(default)]
    pub run_pack_evals: bool,
}

/// When a pack eval handler fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalTrigger {
    EveryTurn,
    OnSessionComplete,
    OnConversationComplete,
}

/// A pack-level eval definition: a handler type plus its trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDefConfig {
    pub id: String,
    /// Handler key in the eval-type registry.
    pub eval_type: String,
    pub trigger: EvalTrigger,
    #[serde(default)]
    pub params: Metadata,
}

/// Structured result of one pack eval invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub eval_id: String,
    pub eval_type: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_user() -> String {
    "user".into()
}
fn d_task_type() -> String {
    "conversation".into()
}
fn d_adapter() -> String {
    "jsonl".into()
}
fn d_silence_ms() -> u64 {
    800
}
fn d_min_speech_ms() -> u64 {
    200
}
fn d_max_turn_ms() -> u64 {
    30_000
}
fn d_timeout_secs() -> u64 {
    120
}
fn d_inter_turn_ms() -> u64 {
    500
}
fn d_self_play_delay_ms() -> u64 {
    1000
}
