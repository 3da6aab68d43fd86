//! Deterministic in-process provider for mock-provider mode and tests.
//!
//! A YAML catalog declares one or more mock providers with canned
//! responses (matched by substring of the latest user message), scripted
//! tool calls, per-token pricing, and a duplex session profile (reply
//! text, audio echo, and an optional session-end after N turns for
//! resilience testing).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use arena_domain::audio::{AudioFrame, CHUNK_BYTES};
use arena_domain::element::{meta, StreamElement};
use arena_domain::error::{Error, Result};
use arena_domain::message::{CostBreakdown, Message, Role};
use arena_domain::tool::ToolCall;
use arena_domain::BoxStream;

use crate::registry::ProviderRegistry;
use crate::traits::{
    PredictRequest, PredictResponse, Provider, ProviderCapabilities, ProviderSession,
    SessionControl, StreamingInputConfig, Usage,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The full mock catalog as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockCatalog {
    pub providers: Vec<MockProviderConfig>,
}

impl MockCatalog {
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("mock catalog {}: {e}", path.display())))
    }

    /// Build a registry holding one [`MockProvider`] per catalog entry.
    pub fn into_registry(self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for cfg in self.providers {
            registry.register(Arc::new(MockProvider::new(cfg)));
        }
        registry
    }
}

/// A scripted tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A canned response rule matched against the latest user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRule {
    /// Substring that must appear in the latest user message.
    #[serde(rename = "match")]
    pub pattern: String,
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<MockToolCall>,
    /// Reply used for the follow-up prediction after tool results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_tools: Option<String>,
}

/// Duplex session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDuplexConfig {
    #[serde(default = "d_reply_text")]
    pub reply_text: String,
    /// Per-turn scripted replies; cycles back to `reply_text` when
    /// exhausted.
    #[serde(default)]
    pub replies: Vec<String>,
    /// Echo one audio chunk back with each reply.
    #[serde(default)]
    pub echo_audio: bool,
    /// Tool calls emitted on the first turn.
    #[serde(default)]
    pub tool_calls: Vec<MockToolCall>,
    /// Close the session's output after this many turns (0 = never).
    #[serde(default)]
    pub end_after_turns: u32,
}

impl Default for MockDuplexConfig {
    fn default() -> Self {
        Self {
            reply_text: d_reply_text(),
            replies: Vec::new(),
            echo_audio: false,
            tool_calls: Vec::new(),
            end_after_turns: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockProviderConfig {
    pub id: String,
    #[serde(default = "d_group")]
    pub group: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub streaming_input: bool,
    #[serde(default = "d_input_rate")]
    pub input_cost_per_1k: f64,
    #[serde(default = "d_output_rate")]
    pub output_cost_per_1k: f64,
    #[serde(default = "d_default_response")]
    pub default_response: String,
    #[serde(default)]
    pub rules: Vec<MockRule>,
    #[serde(default)]
    pub duplex: MockDuplexConfig,
}

impl MockProviderConfig {
    /// A bare config with defaults, for tests and programmatic setup.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: d_group(),
            capabilities: Vec::new(),
            streaming_input: false,
            input_cost_per_1k: d_input_rate(),
            output_cost_per_1k: d_output_rate(),
            default_response: d_default_response(),
            rules: Vec::new(),
            duplex: MockDuplexConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MockProvider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MockProvider {
    config: MockProviderConfig,
    capabilities: ProviderCapabilities,
    call_seq: AtomicU64,
}

impl MockProvider {
    pub fn new(config: MockProviderConfig) -> Self {
        let capabilities = ProviderCapabilities {
            group: config.group.clone(),
            capabilities: config.capabilities.clone(),
            streaming_input: config.streaming_input,
        };
        Self {
            config,
            capabilities,
            call_seq: AtomicU64::new(0),
        }
    }

    fn next_call_id(&self) -> String {
        format!("call-{}", self.call_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn matching_rule(&self, req: &PredictRequest) -> Option<&MockRule> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())?;
        self.config
            .rules
            .iter()
            .find(|r| last_user.contains(&r.pattern))
    }

    fn usage_for(&self, req: &PredictRequest, completion: &str) -> Usage {
        let prompt_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        Usage {
            prompt_tokens: (prompt_chars / 4).max(1) as u32,
            completion_tokens: (completion.len() / 4).max(1) as u32,
            cached_tokens: 0,
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn predict(&self, req: PredictRequest) -> Result<PredictResponse> {
        let rule = self.matching_rule(&req);
        let after_tool_round = req
            .messages
            .last()
            .map(|m| m.role == Role::Tool)
            .unwrap_or(false);

        let (content, tool_calls) = if after_tool_round {
            let text = rule
                .and_then(|r| r.after_tools.clone())
                .unwrap_or_else(|| self.config.default_response.clone());
            (text, Vec::new())
        } else {
            match rule {
                Some(rule) => {
                    let calls = rule
                        .tool_calls
                        .iter()
                        .map(|tc| ToolCall {
                            call_id: self.next_call_id(),
                            tool_name: tc.tool.clone(),
                            arguments: tc.arguments.clone(),
                        })
                        .collect();
                    (rule.text.clone(), calls)
                }
                None => (self.config.default_response.clone(), Vec::new()),
            }
        };

        let usage = self.usage_for(&req, &content);
        let finish_reason = if tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        Ok(PredictResponse {
            content,
            tool_calls,
            usage: Some(usage),
            finish_reason: Some(finish_reason.into()),
        })
    }

    async fn predict_stream(
        &self,
        req: PredictRequest,
    ) -> Result<BoxStream<'static, Result<StreamElement>>> {
        let response = self.predict(req).await?;
        let stream = async_stream::stream! {
            for word in response.content.split_inclusive(' ') {
                yield Ok(StreamElement::text(word));
            }
            let message = Message::assistant(response.content.clone())
                .with_tool_calls(response.tool_calls.clone());
            yield Ok(StreamElement::message(message));
            yield Ok(StreamElement::end_of_stream());
        };
        Ok(Box::pin(stream))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn calculate_cost(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
    ) -> CostBreakdown {
        // Cached input is billed at a tenth of the input rate.
        let input_cost = (input_tokens as f64 / 1000.0) * self.config.input_cost_per_1k
            + (cached_tokens as f64 / 1000.0) * self.config.input_cost_per_1k * 0.1;
        let output_cost = (output_tokens as f64 / 1000.0) * self.config.output_cost_per_1k;
        CostBreakdown {
            input_tokens,
            output_tokens,
            cached_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    async fn create_stream_session(
        &self,
        config: StreamingInputConfig,
    ) -> Result<ProviderSession> {
        if !self.config.streaming_input {
            return Err(Error::provider(self.id(), "streaming input not supported"));
        }

        let (in_tx, in_rx) = mpsc::channel::<StreamElement>(64);
        let (out_tx, out_rx) = mpsc::channel::<StreamElement>(64);
        let (ctl_tx, ctl_rx) = mpsc::channel::<SessionControl>(8);

        let worker = MockSessionWorker {
            provider_id: self.config.id.clone(),
            duplex: self.config.duplex.clone(),
            cost: self.calculate_cost(40, 20, 0),
            system_prompt: config.system_prompt,
        };
        tokio::spawn(worker.run(in_rx, out_tx, ctl_rx));

        Ok(ProviderSession::new(in_tx, out_rx, ctl_tx))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock session worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MockSessionWorker {
    provider_id: String,
    duplex: MockDuplexConfig,
    cost: CostBreakdown,
    system_prompt: Option<String>,
}

impl MockSessionWorker {
    async fn run(
        self,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
        mut control: mpsc::Receiver<SessionControl>,
    ) {
        let mut turn: u32 = 0;
        let mut current_turn_id: Option<String> = None;

        loop {
            tokio::select! {
                // Input is polled first so buffered turn elements are
                // consumed before the turn-complete control signal.
                biased;
                el = input.recv() => match el {
                    Some(el) => {
                        if let Some(turn_id) = el.turn_id() {
                            current_turn_id = Some(turn_id.to_owned());
                        }
                    }
                    None => break,
                },
                ctl = control.recv() => match ctl {
                    Some(SessionControl::EndInput) => {
                        // Drain anything still buffered for this turn.
                        while let Ok(el) = input.try_recv() {
                            if let Some(turn_id) = el.turn_id() {
                                current_turn_id = Some(turn_id.to_owned());
                            }
                        }
                        turn += 1;
                        if self
                            .emit_reply(&output, turn, current_turn_id.as_deref())
                            .await
                            .is_err()
                        {
                            break;
                        }
                        if self.duplex.end_after_turns > 0 && turn >= self.duplex.end_after_turns {
                            tracing::debug!(
                                provider_id = %self.provider_id,
                                turn,
                                "mock session ending after configured turn count"
                            );
                            break;
                        }
                    }
                    Some(SessionControl::Close) | None => break,
                },
            }
        }
        // Dropping `output` here closes the session from the provider side.
    }

    async fn emit_reply(
        &self,
        output: &mpsc::Sender<StreamElement>,
        turn: u32,
        turn_id: Option<&str>,
    ) -> std::result::Result<(), ()> {
        let text = self
            .duplex
            .replies
            .get((turn - 1) as usize)
            .cloned()
            .unwrap_or_else(|| self.duplex.reply_text.clone());

        let stamp = |el: StreamElement| match turn_id {
            Some(id) => el.with_turn_id(id),
            None => el,
        };

        if turn == 1 && !self.duplex.tool_calls.is_empty() {
            let calls = self
                .duplex
                .tool_calls
                .iter()
                .enumerate()
                .map(|(i, tc)| ToolCall {
                    call_id: format!("duplex-call-{}", i + 1),
                    tool_name: tc.tool.clone(),
                    arguments: tc.arguments.clone(),
                })
                .collect();
            output
                .send(stamp(StreamElement::tool_calls(calls)))
                .await
                .map_err(|_| ())?;
        }

        let mut message = Message::assistant(text).with_cost(self.cost.clone());
        if let Some(prompt) = &self.system_prompt {
            message
                .metadata
                .insert(meta::SYSTEM_PROMPT.into(), serde_json::json!(prompt));
        }
        if let Some(id) = turn_id {
            message
                .metadata
                .insert(meta::TURN_ID.into(), serde_json::json!(id));
        }
        output
            .send(stamp(StreamElement::message(message)))
            .await
            .map_err(|_| ())?;

        if self.duplex.echo_audio {
            let frame = AudioFrame::pcm16(vec![0u8; CHUNK_BYTES]);
            output
                .send(stamp(StreamElement::audio(frame)))
                .await
                .map_err(|_| ())?;
        }

        output
            .send(stamp(StreamElement::end_of_stream()))
            .await
            .map_err(|_| ())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_group() -> String {
    "default".into()
}
fn d_input_rate() -> f64 {
    0.5
}
fn d_output_rate() -> f64 {
    1.5
}
fn d_default_response() -> String {
    "This is a mock response.".into()
}
fn d_reply_text() -> String {
    "This is a mock duplex reply.".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn provider_with_rules() -> MockProvider {
        let mut cfg = MockProviderConfig::named("mock");
        cfg.rules.push(MockRule {
            pattern: "billing".into(),
            text: "Checking your invoice.".into(),
            tool_calls: vec![MockToolCall {
                tool: "lookup".into(),
                arguments: serde_json::json!({"q": "billing"}),
            }],
            after_tools: Some("Your invoice is ready.".into()),
        });
        MockProvider::new(cfg)
    }

    fn req(messages: Vec<Message>) -> PredictRequest {
        PredictRequest {
            messages,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn matches_rules_and_emits_tool_calls() {
        let p = provider_with_rules();
        let resp = p
            .predict(req(vec![Message::user("I have a billing question")]))
            .await
            .unwrap();
        assert_eq!(resp.content, "Checking your invoice.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "lookup");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn after_tools_round_has_no_tool_calls() {
        let p = provider_with_rules();
        let resp = p
            .predict(req(vec![
                Message::user("billing please"),
                Message::assistant("Checking your invoice."),
                Message::tool_result("call-1", "lookup", "{\"status\":\"paid\"}", false),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.content, "Your invoice is ready.");
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn unmatched_falls_back_to_default() {
        let p = provider_with_rules();
        let resp = p.predict(req(vec![Message::user("hello")])).await.unwrap();
        assert_eq!(resp.content, "This is a mock response.");
    }

    #[tokio::test]
    async fn stream_ends_with_message_and_eos() {
        let p = provider_with_rules();
        let mut stream = p
            .predict_stream(req(vec![Message::user("hello")]))
            .await
            .unwrap();
        let mut elements = Vec::new();
        while let Some(el) = stream.next().await {
            elements.push(el.unwrap());
        }
        assert!(elements.len() >= 2);
        assert!(elements[elements.len() - 1].is_end_of_stream());
        assert!(matches!(
            elements[elements.len() - 2].payload,
            arena_domain::element::ElementPayload::Message { .. }
        ));
    }

    #[test]
    fn cost_uses_per_thousand_rates() {
        let p = provider_with_rules();
        let cost = p.calculate_cost(2000, 1000, 0);
        assert!((cost.input_cost - 1.0).abs() < 1e-9);
        assert!((cost.output_cost - 1.5).abs() < 1e-9);
        assert!((cost.total_cost - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplex_session_replies_per_turn_and_ends() {
        let mut cfg = MockProviderConfig::named("rt");
        cfg.streaming_input = true;
        cfg.duplex.end_after_turns = 2;
        cfg.duplex.echo_audio = true;
        let p = MockProvider::new(cfg);

        let mut session = p
            .create_stream_session(StreamingInputConfig::default())
            .await
            .unwrap();
        let mut out = session.take_output().unwrap();
        let in_tx = session.input_sender();

        for turn in 0..2 {
            in_tx
                .send(
                    StreamElement::audio(AudioFrame::pcm16(vec![0u8; CHUNK_BYTES]))
                        .with_turn_id(&format!("t-{turn}")),
                )
                .await
                .unwrap();
            session.end_input().await.unwrap();

            let mut saw_eos = false;
            while let Some(el) = out.recv().await {
                if el.is_end_of_stream() {
                    saw_eos = true;
                    break;
                }
            }
            assert!(saw_eos, "turn {turn} should produce end-of-stream");
        }

        // Session ended after two turns: output closes.
        assert!(out.recv().await.is_none());
    }

    #[test]
    fn catalog_yaml_round_trip() {
        let yaml = r#"
providers:
  - id: mock-a
    streaming_input: true
    rules:
      - match: billing
        text: "Invoice on the way."
    duplex:
      reply_text: "hi"
      end_after_turns: 3
"#;
        let catalog: MockCatalog = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(catalog.providers.len(), 1);
        assert_eq!(catalog.providers[0].duplex.end_after_turns, 3);
        let registry = catalog.into_registry();
        assert!(registry.get("mock-a").is_some());
    }
}
