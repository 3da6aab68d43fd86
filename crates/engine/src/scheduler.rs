//! Bounded-concurrency plan execution.
//!
//! One worker per combination, gated by a counting semaphore. Workers
//! write their results into in-order output slots under a lock. The
//! scheduler never retries; per-run errors land in the state store, and
//! only metadata-save failures surface to the caller.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::Instrument;

use arena_domain::config::Configuration;
use arena_domain::error::{Error, Result};
use arena_domain::event::{names, Event};
use arena_domain::run::{RunCombination, RunMetadata, RunPlan, EVAL_PROVIDER_ID};
use arena_events::EventBus;
use arena_providers::ProviderRegistry;
use arena_store::StateStore;

use crate::composite::{CompositeConversation, ConversationRequest};
use crate::scripted::ensure_conversation;

#[derive(Clone)]
pub struct RunScheduler {
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub config: Arc<Configuration>,
    pub providers: Arc<ProviderRegistry>,
    pub composite: Arc<CompositeConversation>,
}

struct RunSlot {
    run_id: String,
    save_error: Option<String>,
}

impl RunScheduler {
    /// Execute every combination of the plan under the concurrency cap.
    /// Returns the run IDs in plan order.
    pub async fn execute(&self, plan: &RunPlan, concurrency: usize) -> Result<Vec<String>> {
        if concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let slots: Arc<Mutex<Vec<Option<RunSlot>>>> =
            Arc::new(Mutex::new((0..plan.len()).map(|_| None).collect()));

        let mut handles = Vec::with_capacity(plan.len());
        for (index, combination) in plan.combinations.iter().cloned().enumerate() {
            let scheduler = self.clone();
            let semaphore = semaphore.clone();
            let slots = slots.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore closed");
                let run_id = make_run_id(&combination, index);
                let span = tracing::info_span!("run", %run_id);
                let save_error = scheduler
                    .execute_run(&combination, &run_id)
                    .instrument(span)
                    .await;
                slots.lock()[index] = Some(RunSlot { run_id, save_error });
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "run worker panicked");
            }
        }

        let mut run_ids = Vec::with_capacity(plan.len());
        let mut save_errors = Vec::new();
        for slot in slots.lock().drain(..) {
            match slot {
                Some(slot) => {
                    if let Some(error) = slot.save_error {
                        save_errors.push(format!("{}: {error}", slot.run_id));
                    }
                    run_ids.push(slot.run_id);
                }
                None => save_errors.push("run worker died before reporting".into()),
            }
        }

        if save_errors.is_empty() {
            Ok(run_ids)
        } else {
            Err(Error::Store(format!(
                "metadata save failed for {} run(s): {}",
                save_errors.len(),
                save_errors.join("; ")
            )))
        }
    }

    /// Execute one combination end to end. Returns a metadata-save error
    /// when saving itself failed; every other error is recorded in the
    /// saved metadata instead.
    async fn execute_run(&self, combination: &RunCombination, run_id: &str) -> Option<String> {
        self.bus.publish(
            Event::new(names::RUN_STARTED, run_id)
                .with_conversation(run_id)
                .with_payload("combination", serde_json::json!(combination.label())),
        );

        let mut metadata = match combination {
            RunCombination::Scenario {
                region,
                scenario_id,
                provider_id,
            } => {
                let mut m = RunMetadata::started(run_id, region, provider_id);
                m.scenario_id = Some(scenario_id.clone());
                m
            }
            RunCombination::Eval { eval_id, recording } => {
                let mut m = RunMetadata::started(run_id, "default", EVAL_PROVIDER_ID);
                m.eval_id = Some(eval_id.clone());
                m.recording_path = Some(recording.path.clone());
                m
            }
        };

        if let Err(e) = ensure_conversation(&self.store, run_id, &self.config.user_id) {
            metadata.error = Some(e.to_string());
            return self.finish_run(run_id, metadata);
        }

        // ── Resolution ───────────────────────────────────────────────
        let request = match combination {
            RunCombination::Scenario {
                region,
                scenario_id,
                provider_id,
            } => {
                let Some(scenario) = self.config.scenario(scenario_id) else {
                    metadata.error = Some(format!("plan: scenario not found: {scenario_id}"));
                    return self.finish_run(run_id, metadata);
                };
                let Some(provider) = self.providers.get(provider_id) else {
                    metadata.error = Some(format!("plan: provider not found: {provider_id}"));
                    return self.finish_run(run_id, metadata);
                };
                metadata.self_play = scenario.has_self_play();
                metadata.persona = scenario.first_persona().map(str::to_owned);
                ConversationRequest {
                    run_id: run_id.to_owned(),
                    region: region.clone(),
                    user_id: self.config.user_id.clone(),
                    scenario: Some(scenario.clone()),
                    provider: Some(provider),
                    eval: None,
                    recording: None,
                }
            }
            RunCombination::Eval { eval_id, recording } => {
                let Some(eval) = self.config.eval(eval_id) else {
                    metadata.error = Some(format!("plan: eval not found: {eval_id}"));
                    return self.finish_run(run_id, metadata);
                };
                ConversationRequest {
                    run_id: run_id.to_owned(),
                    region: "default".to_owned(),
                    user_id: self.config.user_id.clone(),
                    scenario: None,
                    provider: None,
                    eval: Some(eval.clone()),
                    recording: Some(recording.clone()),
                }
            }
        };

        // ── Conversation ─────────────────────────────────────────────
        let mut assertion_failed = false;
        match self.composite.run(&request).await {
            Ok(outcome) => {
                metadata.error = outcome.error.clone();
                metadata.self_play |= outcome.self_play;
                if outcome.persona.is_some() {
                    metadata.persona = outcome.persona.clone();
                }
                if outcome.recording_path.is_some() {
                    metadata.recording_path = outcome.recording_path.clone();
                }
                metadata.conversation_assertions = outcome.conversation_assertions;
                assertion_failed = outcome.failed;
            }
            Err(e) => {
                metadata.error = Some(e.to_string());
            }
        }

        let failed = metadata.error.is_some() || assertion_failed;
        self.finish_run_inner(run_id, metadata, failed)
    }

    /// Failure shorthand used by the resolution paths.
    fn finish_run(&self, run_id: &str, metadata: RunMetadata) -> Option<String> {
        self.finish_run_inner(run_id, metadata, true)
    }

    fn finish_run_inner(
        &self,
        run_id: &str,
        mut metadata: RunMetadata,
        failed: bool,
    ) -> Option<String> {
        metadata.finish();
        let error_text = metadata.error.clone();
        let save_error = self
            .store
            .save_metadata(run_id, metadata)
            .err()
            .map(|e| e.to_string());

        let event_name = if failed {
            names::RUN_FAILED
        } else {
            names::RUN_COMPLETED
        };
        let mut event = Event::new(event_name, run_id).with_conversation(run_id);
        if let Some(error) = error_text {
            event = event.with_payload("error", serde_json::json!(error));
        }
        self.bus.publish(event);
        save_error
    }
}

/// RunID: `YYYY-MM-DDTHH-MMZ_<provider|eval>_<region>_<scenarioOrEvalID>_<8hex>`
/// where the suffix is the first 4 bytes of the SHA-256 over the key
/// components (plus a nanosecond clock and the plan index, so repeated
/// plans within one minute stay unique).
fn make_run_id(combination: &RunCombination, index: usize) -> String {
    let now = Utc::now();
    let timestamp = now.format("%Y-%m-%dT%H-%MZ");

    let (provider, region, id, extra) = match combination {
        RunCombination::Scenario {
            region,
            scenario_id,
            provider_id,
        } => (
            provider_id.as_str(),
            region.as_str(),
            scenario_id.as_str(),
            String::new(),
        ),
        RunCombination::Eval { eval_id, recording } => (
            EVAL_PROVIDER_ID,
            "default",
            eval_id.as_str(),
            recording.path.clone(),
        ),
    };

    let digest = Sha256::digest(
        format!(
            "{provider}|{region}|{id}|{extra}|{index}|{}",
            now.timestamp_nanos_opt().unwrap_or_default()
        )
        .as_bytes(),
    );
    let hash = hex::encode(&digest[..4]);

    format!("{timestamp}_{provider}_{region}_{id}_{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::run::RecordingRef;

    #[test]
    fn run_id_format() {
        let combination = RunCombination::Scenario {
            region: "us".into(),
            scenario_id: "s1".into(),
            provider_id: "p1".into(),
        };
        let run_id = make_run_id(&combination, 0);
        let parts: Vec<&str> = run_id.split('_').collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[0].ends_with('Z'));
        assert_eq!(parts[1], "p1");
        assert_eq!(parts[2], "us");
        assert_eq!(parts[3], "s1");
        assert_eq!(parts[4].len(), 8);
        assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn eval_run_id_uses_eval_marker() {
        let combination = RunCombination::Eval {
            eval_id: "e1".into(),
            recording: RecordingRef {
                source: "r/*.jsonl".into(),
                path: "r/a.jsonl".into(),
                adapter: "jsonl".into(),
            },
        };
        let run_id = make_run_id(&combination, 3);
        assert!(run_id.contains("_eval_default_e1_"));
    }

    #[test]
    fn duplicate_combinations_get_distinct_ids() {
        let combination = RunCombination::Scenario {
            region: "us".into(),
            scenario_id: "s1".into(),
            provider_id: "p1".into(),
        };
        let a = make_run_id(&combination, 0);
        let b = make_run_id(&combination, 1);
        assert_ne!(a, b);
    }
}
