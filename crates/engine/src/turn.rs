//! Turn execution — the inner loop that drives one scripted or
//! self-play turn: user message, provider prediction, tool dispatch,
//! state-store writes.
//!
//! Failure semantics: a provider error or tool error surfaces as the
//! turn's error, but every message persisted before the failure stays
//! persisted.

use std::collections::HashMap;
use std::sync::Arc;

use arena_domain::error::{Error, Result};
use arena_domain::event::{names, Event};
use arena_domain::message::{Message, META_PERSONA};
use arena_events::EventBus;
use arena_pipeline::{stages::substitute, PromptRegistry};
use arena_providers::{PredictRequest, Provider};
use arena_store::StateStore;
use arena_tools::ToolRegistry;

use crate::selfplay::{ProviderSelfPlay, SelfPlayRegistry};

/// Everything one turn needs.
pub struct TurnRequest {
    pub conversation_id: String,
    pub run_id: String,
    pub provider: Arc<dyn Provider>,
    pub task_type: String,
    pub variables: HashMap<String, String>,
    /// Scripted user content. Mutually exclusive with `persona`.
    pub content: Option<String>,
    /// Self-play persona generating the user utterance.
    pub persona: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
}

pub struct TurnExecutor {
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub prompts: Arc<dyn PromptRegistry>,
    pub self_play: Arc<SelfPlayRegistry>,
    /// Cap on assistant → tool → assistant rounds within one turn.
    pub max_tool_iterations: usize,
}

impl TurnExecutor {
    /// Execute exactly one logical turn, persisting every produced
    /// message to the state store.
    pub async fn execute(&self, req: &TurnRequest) -> Result<()> {
        self.bus.publish(
            Event::new(names::TURN_STARTED, &req.run_id)
                .with_conversation(&req.conversation_id),
        );

        match self.execute_inner(req).await {
            Ok(()) => {
                self.bus.publish(
                    Event::new(names::TURN_COMPLETED, &req.run_id)
                        .with_conversation(&req.conversation_id),
                );
                Ok(())
            }
            Err(e) => {
                self.bus.publish(
                    Event::new(names::TURN_FAILED, &req.run_id)
                        .with_conversation(&req.conversation_id)
                        .with_payload("error", serde_json::json!(e.to_string())),
                );
                Err(e)
            }
        }
    }

    async fn execute_inner(&self, req: &TurnRequest) -> Result<()> {
        let history = self.store.load(&req.conversation_id)?;

        // ── User side: scripted content or self-play generation ──────
        let mut user_message = match (&req.persona, &req.content) {
            (Some(persona), _) => {
                let generator: Arc<dyn crate::selfplay::SelfPlayGenerator> =
                    match self.self_play.resolve(persona) {
                        Ok(generator) => generator,
                        // No registered generator: fall back to the run's
                        // own provider speaking as the user.
                        Err(_) => Arc::new(ProviderSelfPlay::new(req.provider.clone())),
                    };
                let text = generator.generate(persona, &history.messages).await?;
                Message::user(text).with_meta(META_PERSONA, serde_json::json!(persona))
            }
            (None, Some(content)) => Message::user(substitute(content, &req.variables)),
            (None, None) => {
                return Err(Error::Config(
                    "turn has neither scripted content nor a persona".into(),
                ))
            }
        };
        user_message
            .metadata
            .insert("run_id".into(), serde_json::json!(req.run_id));
        self.store
            .append_message(&req.conversation_id, user_message.clone())?;

        // ── Assemble the prompt ──────────────────────────────────────
        let bundle = self.prompts.load(&req.task_type)?;
        let system_prompt = substitute(&bundle.system_prompt, &req.variables);

        let mut messages = Vec::with_capacity(history.messages.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.messages);
        messages.push(user_message);

        let tool_defs = self.tools.list();

        // ── Tool loop ────────────────────────────────────────────────
        for iteration in 0..self.max_tool_iterations.max(1) {
            tracing::debug!(
                run_id = %req.run_id,
                iteration,
                "predicting"
            );
            let started = std::time::Instant::now();
            let response = req
                .provider
                .predict(PredictRequest {
                    messages: messages.clone(),
                    tools: tool_defs.clone(),
                    temperature: req.temperature,
                    max_tokens: req.max_tokens,
                    seed: req.seed,
                })
                .await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            let cost = response.usage.map(|u| {
                req.provider
                    .calculate_cost(u.prompt_tokens, u.completion_tokens, u.cached_tokens)
            });

            let mut assistant = Message::assistant(response.content)
                .with_tool_calls(response.tool_calls.clone())
                .with_latency(latency_ms);
            if let Some(cost) = cost {
                assistant = assistant.with_cost(cost);
            }
            self.store
                .append_message(&req.conversation_id, assistant.clone())?;
            messages.push(assistant);

            if response.tool_calls.is_empty() {
                return Ok(());
            }

            // Tool results are appended immediately after the assistant
            // message that requested them.
            for call in &response.tool_calls {
                let outcome = self.tools.execute(&call.tool_name, &call.arguments).await;
                let tool_message = Message::tool_result(
                    &call.call_id,
                    &call.tool_name,
                    outcome.content(),
                    outcome.is_error(),
                );
                self.store
                    .append_message(&req.conversation_id, tool_message.clone())?;
                messages.push(tool_message);
            }

            if iteration + 1 == self.max_tool_iterations.max(1) {
                tracing::warn!(
                    run_id = %req.run_id,
                    limit = self.max_tool_iterations,
                    "tool iteration limit reached"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::message::Role;
    use arena_domain::state::ConversationState;
    use arena_providers::mock::{MockProvider, MockProviderConfig, MockRule, MockToolCall};
    use arena_tools::FnTool;
    use arena_domain::tool::ToolDescriptor;

    fn executor(provider_cfg: MockProviderConfig) -> (TurnExecutor, Arc<dyn Provider>) {
        let store = Arc::new(StateStore::new());
        store.save(ConversationState::new("r1", "tester")).unwrap();
        let tools = Arc::new(ToolRegistry::new());
        tools.register(
            ToolDescriptor::new("lookup", "lookup things"),
            Arc::new(FnTool(|args: &serde_json::Value| {
                Ok(serde_json::json!({"echo": args.clone()}))
            })),
        );
        let executor = TurnExecutor {
            store,
            bus: Arc::new(EventBus::new()),
            tools,
            prompts: Arc::new(
                crate::prompts::StaticPromptRegistry::new().with_fallback("be helpful"),
            ),
            self_play: Arc::new(SelfPlayRegistry::new()),
            max_tool_iterations: 4,
        };
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new(provider_cfg));
        (executor, provider)
    }

    fn request(provider: Arc<dyn Provider>, content: &str) -> TurnRequest {
        TurnRequest {
            conversation_id: "r1".into(),
            run_id: "r1".into(),
            provider,
            task_type: "conversation".into(),
            variables: HashMap::new(),
            content: Some(content.into()),
            persona: None,
            temperature: None,
            max_tokens: None,
            seed: None,
        }
    }

    #[tokio::test]
    async fn scripted_turn_appends_user_and_assistant() {
        let (executor, provider) = executor(MockProviderConfig::named("p1"));
        executor
            .execute(&request(provider, "hello there"))
            .await
            .unwrap();

        let state = executor.store.load("r1").unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[0].content, "hello there");
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert!(state.messages[1].cost.is_some());
        assert!(state.messages[1].latency_ms.is_some());
    }

    #[tokio::test]
    async fn tool_loop_pairs_results_after_assistant() {
        let mut cfg = MockProviderConfig::named("p1");
        cfg.rules.push(MockRule {
            pattern: "billing".into(),
            text: "checking".into(),
            tool_calls: vec![MockToolCall {
                tool: "lookup".into(),
                arguments: serde_json::json!({"q": "billing"}),
            }],
            after_tools: Some("invoice found".into()),
        });
        let (executor, provider) = executor(cfg);
        executor
            .execute(&request(provider, "billing question"))
            .await
            .unwrap();

        let state = executor.store.load("r1").unwrap();
        // user, assistant(+tool_call), tool result, final assistant.
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[1].role, Role::Assistant);
        let call_id = &state.messages[1].tool_calls.as_ref().unwrap()[0].call_id;
        assert_eq!(state.messages[2].role, Role::Tool);
        assert_eq!(
            &state.messages[2].tool_result.as_ref().unwrap().call_id,
            call_id
        );
        assert_eq!(state.messages[3].content, "invoice found");
    }

    #[tokio::test]
    async fn self_play_uses_registry() {
        struct Canned;
        #[async_trait::async_trait]
        impl crate::selfplay::SelfPlayGenerator for Canned {
            async fn generate(&self, _: &str, _: &[Message]) -> Result<String> {
                Ok("what about security?".into())
            }
        }

        let (executor, provider) = executor(MockProviderConfig::named("p1"));
        executor.self_play.register("curious", Arc::new(Canned));

        let mut req = request(provider, "");
        req.content = None;
        req.persona = Some("curious".into());
        executor.execute(&req).await.unwrap();

        let state = executor.store.load("r1").unwrap();
        assert_eq!(state.messages[0].content, "what about security?");
        assert_eq!(
            state.messages[0].metadata.get(META_PERSONA).unwrap(),
            "curious"
        );
    }

    #[tokio::test]
    async fn template_variables_substituted_in_content() {
        let (executor, provider) = executor(MockProviderConfig::named("p1"));
        let mut req = request(provider, "ask about {{topic}}");
        req.variables.insert("topic".into(), "refunds".into());
        executor.execute(&req).await.unwrap();

        let state = executor.store.load("r1").unwrap();
        assert_eq!(state.messages[0].content, "ask about refunds");
    }

    #[tokio::test]
    async fn tool_error_recorded_not_raised() {
        let mut cfg = MockProviderConfig::named("p1");
        cfg.rules.push(MockRule {
            pattern: "break".into(),
            text: "trying a tool".into(),
            tool_calls: vec![MockToolCall {
                tool: "no_such_tool".into(),
                arguments: serde_json::json!({}),
            }],
            after_tools: None,
        });
        let (executor, provider) = executor(cfg);
        executor
            .execute(&request(provider, "break things"))
            .await
            .unwrap();

        let state = executor.store.load("r1").unwrap();
        let tool_message = state
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_message.tool_result.as_ref().unwrap().is_error);
    }

    #[tokio::test]
    async fn missing_content_and_persona_is_config_error() {
        let (executor, provider) = executor(MockProviderConfig::named("p1"));
        let mut req = request(provider, "");
        req.content = None;
        let err = executor.execute(&req).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
