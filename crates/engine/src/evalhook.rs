//! Pack eval hook — running assertion/eval handlers after turns and
//! sessions.
//!
//! A [`PackEvalHook`] holds a registry of eval-type handlers plus the
//! static list of eval definitions from the pack. Each definition
//! carries a trigger; `run_*_evals` selects matching definitions, builds
//! an [`EvalContext`] from the conversation history, and invokes the
//! handlers. In skip mode the hook keeps its definitions but routes
//! through a no-op dispatcher so callers uniformly see empty results.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use arena_domain::error::Result;
use arena_domain::message::{Message, Role};
use arena_domain::scenario::{
    AssertionConfig, EvalDefConfig, EvalResult, EvalTrigger,
};
use arena_domain::tool::{ToolCall, ToolResultPayload};
use arena_domain::Metadata;

use crate::assertions;

/// An assistant tool call paired with its subsequent tool result (by
/// call ID), as presented to eval handlers.
#[derive(Debug, Clone)]
pub struct PairedToolCall {
    pub call: ToolCall,
    pub result: Option<ToolResultPayload>,
}

/// What a handler gets to look at.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Content of the last assistant message (empty when none exists).
    pub output: String,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<PairedToolCall>,
    /// Workflow extras harvested from assistant-message metadata.
    pub workflow: Metadata,
    pub turn_index: Option<usize>,
    pub session_id: Option<String>,
}

impl EvalContext {
    /// Build a context from a conversation history.
    pub fn from_messages(
        messages: &[Message],
        turn_index: Option<usize>,
        session_id: Option<String>,
    ) -> Self {
        let output = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let tool_calls = pair_tool_calls(messages);

        let mut workflow = Metadata::new();
        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            if let Some(serde_json::Value::Object(extras)) = message.metadata.get("workflow") {
                for (key, value) in extras {
                    workflow.insert(key.clone(), value.clone());
                }
            }
        }

        Self {
            output,
            messages: messages.to_vec(),
            tool_calls,
            workflow,
            turn_index,
            session_id,
        }
    }
}

/// Pair assistant tool calls with subsequent tool-result messages by
/// call ID.
pub fn pair_tool_calls(messages: &[Message]) -> Vec<PairedToolCall> {
    let mut results: HashMap<&str, &ToolResultPayload> = HashMap::new();
    for message in messages {
        if let Some(result) = &message.tool_result {
            results.insert(result.call_id.as_str(), result);
        }
    }

    let mut paired = Vec::new();
    for message in messages {
        let Some(calls) = &message.tool_calls else {
            continue;
        };
        for call in calls {
            paired.push(PairedToolCall {
                call: call.clone(),
                result: results.get(call.call_id.as_str()).map(|r| (*r).clone()),
            });
        }
    }
    paired
}

/// One eval-type handler.
#[async_trait]
pub trait EvalHandler: Send + Sync {
    async fn evaluate(&self, def: &EvalDefConfig, ctx: &EvalContext) -> Result<EvalResult>;
}

/// Built-in handler for eval type `"assertion"`: evaluates the assertion
/// configs in `def.params.assertions` against the current output.
pub struct AssertionEvalHandler;

#[async_trait]
impl EvalHandler for AssertionEvalHandler {
    async fn evaluate(&self, def: &EvalDefConfig, ctx: &EvalContext) -> Result<EvalResult> {
        let configs: Vec<AssertionConfig> = def
            .params
            .get("assertions")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let outcomes = assertions::evaluate_all(&configs, &ctx.output);
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.detail.clone().unwrap_or_else(|| o.assertion_type.clone()))
            .collect();
        Ok(EvalResult {
            eval_id: def.id.clone(),
            eval_type: def.eval_type.clone(),
            passed: failed.is_empty(),
            score: Some(if outcomes.is_empty() {
                1.0
            } else {
                (outcomes.len() - failed.len()) as f64 / outcomes.len() as f64
            }),
            detail: if failed.is_empty() {
                None
            } else {
                Some(failed.join("; "))
            },
        })
    }
}

pub struct PackEvalHook {
    handlers: RwLock<HashMap<String, Arc<dyn EvalHandler>>>,
    defs: Vec<EvalDefConfig>,
    skip: bool,
}

impl PackEvalHook {
    pub fn new(defs: Vec<EvalDefConfig>) -> Self {
        let hook = Self {
            handlers: RwLock::new(HashMap::new()),
            defs,
            skip: false,
        };
        hook.register_handler("assertion", Arc::new(AssertionEvalHandler));
        hook
    }

    /// A hook that retains its definitions but dispatches nothing.
    pub fn skipped(defs: Vec<EvalDefConfig>) -> Self {
        let mut hook = Self::new(defs);
        hook.skip = true;
        hook
    }

    pub fn register_handler(&self, eval_type: impl Into<String>, handler: Arc<dyn EvalHandler>) {
        self.handlers.write().insert(eval_type.into(), handler);
    }

    pub fn defs(&self) -> &[EvalDefConfig] {
        &self.defs
    }

    pub async fn run_turn_evals(
        &self,
        messages: &[Message],
        turn_index: usize,
        session_id: Option<&str>,
    ) -> Vec<EvalResult> {
        self.run_trigger(EvalTrigger::EveryTurn, messages, Some(turn_index), session_id)
            .await
    }

    pub async fn run_session_evals(
        &self,
        messages: &[Message],
        session_id: Option<&str>,
    ) -> Vec<EvalResult> {
        self.run_trigger(EvalTrigger::OnSessionComplete, messages, None, session_id)
            .await
    }

    pub async fn run_conversation_evals(&self, messages: &[Message]) -> Vec<EvalResult> {
        self.run_trigger(EvalTrigger::OnConversationComplete, messages, None, None)
            .await
    }

    async fn run_trigger(
        &self,
        trigger: EvalTrigger,
        messages: &[Message],
        turn_index: Option<usize>,
        session_id: Option<&str>,
    ) -> Vec<EvalResult> {
        if self.skip {
            return Vec::new();
        }
        let selected: Vec<&EvalDefConfig> =
            self.defs.iter().filter(|d| d.trigger == trigger).collect();
        if selected.is_empty() {
            return Vec::new();
        }

        let ctx = EvalContext::from_messages(messages, turn_index, session_id.map(str::to_owned));
        let mut results = Vec::with_capacity(selected.len());
        for def in selected {
            let handler = self.handlers.read().get(&def.eval_type).cloned();
            let result = match handler {
                Some(handler) => match handler.evaluate(def, &ctx).await {
                    Ok(result) => result,
                    Err(e) => EvalResult {
                        eval_id: def.id.clone(),
                        eval_type: def.eval_type.clone(),
                        passed: false,
                        score: None,
                        detail: Some(format!("handler error: {e}")),
                    },
                },
                None => EvalResult {
                    eval_id: def.id.clone(),
                    eval_type: def.eval_type.clone(),
                    passed: false,
                    score: None,
                    detail: Some(format!("no handler for eval type {:?}", def.eval_type)),
                },
            };
            results.push(result);
        }
        results
    }

    /// Adapt a list of assertion configs into an ad-hoc eval pass for the
    /// requested trigger.
    pub async fn run_assertions_as_evals(
        &self,
        configs: &[AssertionConfig],
        messages: &[Message],
        trigger: EvalTrigger,
    ) -> Vec<EvalResult> {
        if self.skip || configs.is_empty() {
            return Vec::new();
        }
        let ctx = EvalContext::from_messages(messages, None, None);
        let target = match trigger {
            EvalTrigger::EveryTurn => ctx.output.clone(),
            EvalTrigger::OnSessionComplete | EvalTrigger::OnConversationComplete => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        assertions::evaluate_all(configs, &target)
            .into_iter()
            .map(|o| EvalResult {
                eval_id: format!("assertion:{}", o.assertion_type),
                eval_type: "assertion".into(),
                passed: o.passed,
                score: None,
                detail: o.detail,
            })
            .collect()
    }
}
