//! Scripted conversation — drives the sequence of turns declared by a
//! scenario, including self-play expansion.
//!
//! Turns execute strictly in order; each turn starts only after the
//! previous turn's state-store write completed (the executor persists
//! synchronously before returning). Per-turn assertions are evaluated
//! against the latest assistant message and written into that message's
//! metadata in place.

use std::sync::Arc;

use arena_domain::error::{Error, Result};
use arena_domain::run::ConversationOutcome;
use arena_domain::scenario::{AssertionOutcome, EvalResult};
use arena_domain::state::ConversationState;
use arena_events::EventBus;
use arena_pipeline::PromptRegistry;
use arena_store::StateStore;
use arena_tools::ToolRegistry;

use crate::assertions;
use crate::composite::ConversationRequest;
use crate::evalhook::PackEvalHook;
use crate::selfplay::SelfPlayRegistry;
use crate::turn::{TurnExecutor, TurnRequest};

pub struct ScriptedConversation {
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub prompts: Arc<dyn PromptRegistry>,
    pub self_play: Arc<SelfPlayRegistry>,
    pub hook: Arc<PackEvalHook>,
    pub max_tool_iterations: usize,
}

impl ScriptedConversation {
    pub async fn run(&self, req: &ConversationRequest) -> Result<ConversationOutcome> {
        let scenario = req
            .scenario
            .as_ref()
            .ok_or_else(|| Error::Config("scripted conversation requires a scenario".into()))?;
        let provider = req
            .provider
            .clone()
            .ok_or_else(|| Error::Config("scripted conversation requires a provider".into()))?;

        let conversation_id = req.run_id.clone();
        ensure_conversation(&self.store, &conversation_id, &req.user_id)?;

        let executor = TurnExecutor {
            store: self.store.clone(),
            bus: self.bus.clone(),
            tools: self.tools.clone(),
            prompts: self.prompts.clone(),
            self_play: self.self_play.clone(),
            max_tool_iterations: self.max_tool_iterations,
        };

        let mut outcome = ConversationOutcome {
            conversation_id: conversation_id.clone(),
            ..Default::default()
        };

        tracing::debug!(run_id = %req.run_id, scenario = %scenario.id, "scripted conversation starting");

        'turns: for spec in &scenario.turns {
            let iterations = if spec.is_self_play() {
                outcome.self_play = true;
                if outcome.persona.is_none() {
                    outcome.persona = spec.persona.clone();
                }
                spec.iterations()
            } else {
                1
            };

            for iteration in 0..iterations {
                let turn_request = TurnRequest {
                    conversation_id: conversation_id.clone(),
                    run_id: req.run_id.clone(),
                    provider: provider.clone(),
                    task_type: scenario.task_type.clone(),
                    variables: scenario.prompt_variables.clone(),
                    content: spec.content.clone(),
                    persona: spec.persona.clone(),
                    temperature: scenario.temperature,
                    max_tokens: scenario.max_tokens,
                    seed: scenario.seed,
                };

                if let Err(e) = executor.execute(&turn_request).await {
                    tracing::warn!(
                        turn = outcome.completed_turns,
                        iteration,
                        error = %e,
                        "turn failed"
                    );
                    outcome.failed = true;
                    outcome.error = Some(e.to_string());
                    break 'turns;
                }
                outcome.completed_turns += 1;

                // Per-turn assertions enrich the latest assistant message.
                let turn_outcomes = assertions::apply_to_last_assistant(
                    &self.store,
                    &conversation_id,
                    &spec.assertions,
                )?;
                if turn_outcomes.iter().any(|o| !o.passed) {
                    outcome.failed = true;
                }

                let state = self.store.load(&conversation_id)?;
                let eval_results = self
                    .hook
                    .run_turn_evals(&state.messages, outcome.completed_turns - 1, None)
                    .await;
                record_eval_failures(&mut outcome, &eval_results);
            }
        }

        // Conversation-level assertions over the whole history.
        let state = self.store.load(&conversation_id)?;
        let conversation_outcomes =
            assertions::apply_to_history(&scenario.assertions, &state.messages);
        if conversation_outcomes.iter().any(|o| !o.passed) {
            outcome.failed = true;
        }
        outcome.conversation_assertions.extend(conversation_outcomes);

        let eval_results = self.hook.run_conversation_evals(&state.messages).await;
        record_eval_failures(&mut outcome, &eval_results);

        Ok(outcome)
    }
}

/// Create the conversation record when the scheduler has not already.
pub(crate) fn ensure_conversation(
    store: &Arc<StateStore>,
    conversation_id: &str,
    user_id: &str,
) -> Result<()> {
    match store.load(conversation_id) {
        Ok(_) => Ok(()),
        Err(Error::NotFound(_)) => {
            store.save(ConversationState::new(conversation_id, user_id))
        }
        Err(e) => Err(e),
    }
}

/// Fold failed pack-eval results into the run's conversation assertions.
pub(crate) fn record_eval_failures(outcome: &mut ConversationOutcome, results: &[EvalResult]) {
    for result in results {
        if !result.passed {
            outcome.failed = true;
        }
        outcome.conversation_assertions.push(AssertionOutcome {
            assertion_type: format!("pack:{}", result.eval_id),
            passed: result.passed,
            detail: result.detail.clone(),
        });
    }
}
