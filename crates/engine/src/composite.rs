//! Request routing across the three conversation executors.
//!
//! Precedence: an eval request goes to the eval executor, a scenario
//! with a duplex config goes to the duplex executor, anything else is
//! scripted. An unconfigured branch is a configuration error.

use std::sync::Arc;

use tokio::sync::mpsc;

use arena_domain::error::{Error, Result};
use arena_domain::run::{ConversationOutcome, RecordingRef};
use arena_domain::scenario::{EvalSpec, Scenario};
use arena_providers::Provider;

use crate::duplex::DuplexConversation;
use crate::eval::EvalConversation;
use crate::scripted::ScriptedConversation;

/// One resolved conversation request, as produced by the scheduler.
#[derive(Clone)]
pub struct ConversationRequest {
    pub run_id: String,
    pub region: String,
    pub user_id: String,
    pub scenario: Option<Scenario>,
    pub provider: Option<Arc<dyn Provider>>,
    pub eval: Option<EvalSpec>,
    pub recording: Option<RecordingRef>,
}

#[derive(Clone, Default)]
pub struct CompositeConversation {
    scripted: Option<Arc<ScriptedConversation>>,
    duplex: Option<Arc<DuplexConversation>>,
    eval: Option<Arc<EvalConversation>>,
}

impl CompositeConversation {
    pub fn new(
        scripted: Option<Arc<ScriptedConversation>>,
        duplex: Option<Arc<DuplexConversation>>,
        eval: Option<Arc<EvalConversation>>,
    ) -> Self {
        Self {
            scripted,
            duplex,
            eval,
        }
    }

    pub async fn run(&self, req: &ConversationRequest) -> Result<ConversationOutcome> {
        if req.eval.is_some() {
            let executor = self
                .eval
                .as_ref()
                .ok_or_else(|| Error::Config("eval executor not configured".into()))?;
            return executor.run(req).await;
        }

        let is_duplex = req
            .scenario
            .as_ref()
            .map(|s| s.duplex.is_some())
            .unwrap_or(false);
        if is_duplex {
            let executor = self
                .duplex
                .as_ref()
                .ok_or_else(|| Error::Config("duplex executor not configured".into()))?;
            return executor.run(req).await;
        }

        let executor = self
            .scripted
            .as_ref()
            .ok_or_else(|| Error::Config("scripted executor not configured".into()))?;
        executor.run(req).await
    }

    /// Streaming variant: a single-element channel carrying the final
    /// result (true intra-turn streaming is not required at this layer).
    pub fn run_stream(
        &self,
        req: ConversationRequest,
    ) -> mpsc::Receiver<Result<ConversationOutcome>> {
        let (tx, rx) = mpsc::channel(1);
        let composite = self.clone();
        tokio::spawn(async move {
            let result = composite.run(&req).await;
            let _ = tx.send(result).await;
        });
        rx
    }
}
