//! The pre-validated configuration value the engine consumes.
//!
//! Loading and validation (files, packaging, CLI flags) happen outside
//! the core; by the time a [`Configuration`] reaches the engine it is
//! internally consistent.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scenario::{EvalDefConfig, EvalSpec, Scenario};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,

    #[serde(default)]
    pub evals: Vec<EvalSpec>,

    /// Pack-level eval definitions consumed by the eval hook.
    #[serde(default)]
    pub pack_evals: Vec<EvalDefConfig>,

    /// When set, session recording is enabled from config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_dir: Option<PathBuf>,

    /// Destination for externalized media.
    #[serde(default = "d_media_dir")]
    pub media_dir: PathBuf,

    /// Inline media above this many bytes is written to media storage
    /// and replaced with a file reference.
    #[serde(default = "d_media_threshold")]
    pub media_inline_threshold: usize,

    /// Cap on assistant→tool→assistant iterations within one turn.
    #[serde(default = "d_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// User identifier stamped onto conversation states.
    #[serde(default = "d_user_id")]
    pub user_id: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            scenarios: Vec::new(),
            evals: Vec::new(),
            pack_evals: Vec::new(),
            recording_dir: None,
            media_dir: d_media_dir(),
            media_inline_threshold: d_media_threshold(),
            max_tool_iterations: d_max_tool_iterations(),
            user_id: d_user_id(),
        }
    }
}

impl Configuration {
    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn eval(&self, id: &str) -> Option<&EvalSpec> {
        self.evals.iter().find(|e| e.id == id)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_media_dir() -> PathBuf {
    PathBuf::from("media")
}
fn d_media_threshold() -> usize {
    32 * 1024
}
fn d_max_tool_iterations() -> usize {
    8
}
fn d_user_id() -> String {
    "arena".into()
}
