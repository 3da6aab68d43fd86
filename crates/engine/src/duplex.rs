//! Duplex conversation — a bidirectional real-time audio session driven
//! over the stage pipeline.
//!
//! Per turn: a user message element (with a fresh `turn_id`) is emitted,
//! audio is streamed in 640-byte chunks (paced at 20 ms for user audio,
//! burst mode for self-play TTS so mid-utterance boundaries are not
//! detected), then an end-of-stream marker. A response collector reads
//! the pipeline output until it observes the provider's end-of-stream or
//! an error, executing tool calls and feeding results back into the
//! input channel.
//!
//! Session-end resilience (also applied to deadline expiry): when the
//! provider session ends on the last turn with at least one completed
//! turn and `ignore_last_turn_session_end` set, the run succeeds;
//! otherwise it is a partial success when the completed-turn count
//! reaches `partial_success_min_turns` (a threshold of 0 accepts any
//! partial), and a failure below that.
//!
//! After the last turn an `all_responses_received` sentinel is emitted,
//! the input channel is closed, and the output is drained under a fresh
//! 30-second window independent of the scenario deadline, so state-store
//! writes complete even after a turn timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::audio::{AudioFrame, CHUNK_BYTES, CHUNK_MILLIS};
use arena_domain::element::{meta, ElementPayload, StreamElement};
use arena_domain::error::{Error, Result};
use arena_domain::event::{names, Event};
use arena_domain::message::{Message, META_PERSONA};
use arena_domain::run::ConversationOutcome;
use arena_domain::scenario::{DuplexConfig, Scenario, TurnDetection, TurnSpec};
use arena_events::EventBus;
use arena_pipeline::stages::{
    substitute, AudioTurn, DuplexProvider, MediaExternalizer, PromptAssembly, Resample,
    StateStoreSave, Template, SESSION_ENDED_MESSAGE,
};
use arena_pipeline::{MediaStorage, Pipeline, PromptRegistry, STAGE_CHANNEL_CAPACITY};
use arena_providers::{Provider, StreamingInputConfig};
use arena_store::StateStore;
use arena_tools::ToolRegistry;

use crate::assertions;
use crate::composite::ConversationRequest;
use crate::scripted::ensure_conversation;
use crate::selfplay::{ProviderSelfPlay, SelfPlayRegistry};
use crate::tts::TtsEngine;

/// Window for the post-run output drain. Deliberately independent of
/// the scenario deadline; inheriting it would lose late messages.
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

pub struct DuplexConversation {
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub prompts: Arc<dyn PromptRegistry>,
    pub self_play: Arc<SelfPlayRegistry>,
    pub tts: Arc<dyn TtsEngine>,
    pub media: Arc<dyn MediaStorage>,
    pub media_inline_threshold: usize,
}

impl DuplexConversation {
    pub async fn run(&self, req: &ConversationRequest) -> Result<ConversationOutcome> {
        let scenario = req
            .scenario
            .as_ref()
            .ok_or_else(|| Error::Config("duplex conversation requires a scenario".into()))?;
        let duplex = scenario
            .duplex
            .clone()
            .ok_or_else(|| Error::Config("scenario carries no duplex configuration".into()))?;
        let provider = req
            .provider
            .clone()
            .ok_or_else(|| Error::Config("duplex conversation requires a provider".into()))?;
        if !provider.capabilities().streaming_input {
            return Err(Error::Config(format!(
                "provider {} does not support streaming input",
                provider.id()
            )));
        }

        let conversation_id = req.run_id.clone();
        ensure_conversation(&self.store, &conversation_id, &req.user_id)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.bus.publish(
            Event::new(names::DUPLEX_SESSION_STARTED, &req.run_id)
                .with_session(&session_id)
                .with_conversation(&conversation_id),
        );

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(duplex.timeout_secs.max(1));

        // ── Pipeline assembly ────────────────────────────────────────
        let mut builder = Pipeline::builder();
        if duplex.turn_detection == TurnDetection::Vad {
            builder = builder.stage(AudioTurn::new(duplex.vad.clone()));
        }
        let pipeline = builder
            .stage(PromptAssembly::new(
                self.prompts.clone(),
                scenario.task_type.clone(),
            ))
            .stage(Template::new(scenario.prompt_variables.clone()))
            .stage(Resample)
            .stage(DuplexProvider::new(
                provider.clone(),
                StreamingInputConfig {
                    tools: self.tools.list(),
                    ..Default::default()
                },
            ))
            .stage(MediaExternalizer::new(
                self.media.clone(),
                self.media_inline_threshold,
            ))
            .stage(StateStoreSave::new(
                self.store.clone(),
                conversation_id.clone(),
            ))
            .build();

        let (input, input_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let output = pipeline.execute(cancel.clone(), input_rx);

        let mut collector = ResponseCollector {
            output,
            feedback: input.clone(),
            tools: self.tools.clone(),
            conversation_id: conversation_id.clone(),
        };

        // Expand self-play repetitions into a flat turn list.
        let mut planned: Vec<&TurnSpec> = Vec::new();
        for spec in &scenario.turns {
            let iterations = if spec.is_self_play() {
                spec.iterations()
            } else {
                1
            };
            for _ in 0..iterations {
                planned.push(spec);
            }
        }

        let mut outcome = ConversationOutcome {
            conversation_id: conversation_id.clone(),
            ..Default::default()
        };
        let mut session_errored = false;

        // ── Turn loop ────────────────────────────────────────────────
        for (index, spec) in planned.iter().copied().enumerate() {
            let is_last = index + 1 == planned.len();
            let turn_id = uuid::Uuid::new_v4().to_string();

            self.bus.publish(
                Event::new(names::DUPLEX_TURN_STARTED, &req.run_id)
                    .with_session(&session_id)
                    .with_conversation(&conversation_id)
                    .with_payload("turn", serde_json::json!(index)),
            );

            collector.drain_stale();

            let prepared = match self.prepare_turn(spec, scenario, &conversation_id, &provider).await
            {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.publish_turn_failed(req, &session_id, &conversation_id, index, &e);
                    outcome.failed = true;
                    outcome.error = Some(e.to_string());
                    break;
                }
            };
            if prepared.persona.is_some() {
                outcome.self_play = true;
                if outcome.persona.is_none() {
                    outcome.persona = prepared.persona.clone();
                }
            }
            let after_self_play = prepared.burst;

            let stream_fut = stream_turn(&input, &conversation_id, &turn_id, prepared);
            let collect_fut = collector.collect_turn(deadline);
            let (_streamed, collection) = tokio::join!(stream_fut, collect_fut);

            if collection.completed {
                outcome.completed_turns += 1;
                self.bus.publish(
                    Event::new(names::DUPLEX_TURN_COMPLETED, &req.run_id)
                        .with_session(&session_id)
                        .with_conversation(&conversation_id)
                        .with_payload("turn", serde_json::json!(index)),
                );

                let turn_outcomes = assertions::apply_to_last_assistant(
                    &self.store,
                    &conversation_id,
                    &spec.assertions,
                )?;
                if turn_outcomes.iter().any(|o| !o.passed) {
                    outcome.failed = true;
                }

                if !is_last {
                    let delay = if after_self_play {
                        duplex.self_play_delay_ms
                    } else {
                        duplex.inter_turn_delay_ms
                    };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                continue;
            }

            // The turn did not complete: timeout, session end, or a
            // pipeline error element.
            let error_text = collection
                .error
                .clone()
                .unwrap_or_else(|| SESSION_ENDED_MESSAGE.to_string());
            self.publish_turn_failed(
                req,
                &session_id,
                &conversation_id,
                index,
                &Error::Other(error_text.clone()),
            );
            if collection.timed_out {
                cancel.cancel();
            }
            if collection.session_ended || collection.timed_out {
                session_errored = true;
                self.bus.publish(
                    Event::new(names::DUPLEX_SESSION_ERROR, &req.run_id)
                        .with_session(&session_id)
                        .with_conversation(&conversation_id)
                        .with_payload("error", serde_json::json!(error_text)),
                );
                match session_end_disposition(&duplex, outcome.completed_turns, is_last) {
                    Disposition::Ignored => {
                        tracing::info!(
                            run_id = %req.run_id,
                            "session end on last turn ignored by configuration"
                        );
                    }
                    Disposition::Partial => {
                        tracing::info!(
                            run_id = %req.run_id,
                            completed = outcome.completed_turns,
                            "accepting partial duplex run"
                        );
                    }
                    Disposition::Failed => {
                        outcome.failed = true;
                        outcome.error = Some(error_text);
                    }
                }
            } else {
                // Non-session pipeline error: same partial-success
                // policy, without the last-turn ignore.
                if (outcome.completed_turns as u32) >= duplex.partial_success_min_turns {
                    tracing::warn!(run_id = %req.run_id, error = %error_text, "turn error, accepting partial run");
                } else {
                    outcome.failed = true;
                    outcome.error = Some(error_text);
                }
            }
            break;
        }

        // ── Shutdown: sentinel, close input, drain under fresh window ─
        let sentinel = StreamElement::end_of_stream()
            .with_conversation_id(&conversation_id)
            .with_meta(meta::ALL_RESPONSES_RECEIVED, serde_json::json!(true));
        let _ = input.send(sentinel).await;
        drop(input);
        collector.drain(DRAIN_WINDOW).await;

        if !session_errored {
            self.bus.publish(
                Event::new(names::DUPLEX_SESSION_COMPLETED, &req.run_id)
                    .with_session(&session_id)
                    .with_conversation(&conversation_id)
                    .with_payload(
                        "completed_turns",
                        serde_json::json!(outcome.completed_turns),
                    ),
            );
        }

        // ── Conversation-level assertions over the stored history ────
        let state = self.store.load(&conversation_id)?;
        let conversation_outcomes =
            assertions::apply_to_history(&scenario.assertions, &state.messages);
        if conversation_outcomes.iter().any(|o| !o.passed) {
            outcome.failed = true;
        }
        outcome.conversation_assertions.extend(conversation_outcomes);

        Ok(outcome)
    }

    async fn prepare_turn(
        &self,
        spec: &TurnSpec,
        scenario: &Scenario,
        conversation_id: &str,
        provider: &Arc<dyn Provider>,
    ) -> Result<PreparedTurn> {
        if let Some(persona) = &spec.persona {
            let history = self.store.load(conversation_id)?.messages;
            let generator: Arc<dyn crate::selfplay::SelfPlayGenerator> =
                match self.self_play.resolve(persona) {
                    Ok(generator) => generator,
                    Err(_) => Arc::new(ProviderSelfPlay::new(provider.clone())),
                };
            let text = generator.generate(persona, &history).await?;
            let frame = self.tts.synthesize(&text).await?;
            return Ok(PreparedTurn {
                text,
                audio: frame.data,
                burst: true,
                persona: Some(persona.clone()),
            });
        }

        let text = spec
            .content
            .as_deref()
            .map(|c| substitute(c, &scenario.prompt_variables))
            .unwrap_or_default();

        let audio = match &spec.audio_file {
            Some(path) => std::fs::read(path).map_err(Error::Io)?,
            // Scripted text without an audio file: synthesize it.
            None => self.tts.synthesize(&text).await?.data,
        };

        Ok(PreparedTurn {
            text,
            audio,
            burst: false,
            persona: None,
        })
    }

    fn publish_turn_failed(
        &self,
        req: &ConversationRequest,
        session_id: &str,
        conversation_id: &str,
        index: usize,
        error: &Error,
    ) {
        self.bus.publish(
            Event::new(names::DUPLEX_TURN_FAILED, &req.run_id)
                .with_session(session_id)
                .with_conversation(conversation_id)
                .with_payload("turn", serde_json::json!(index))
                .with_payload("error", serde_json::json!(error.to_string())),
        );
    }
}

struct PreparedTurn {
    text: String,
    audio: Vec<u8>,
    burst: bool,
    persona: Option<String>,
}

/// Emit the user message, the audio chunks (paced unless burst mode),
/// then the end-of-stream marker. Returns `false` when the pipeline went
/// away mid-stream.
async fn stream_turn(
    input: &mpsc::Sender<StreamElement>,
    conversation_id: &str,
    turn_id: &str,
    prepared: PreparedTurn,
) -> bool {
    let mut user = Message::user(prepared.text);
    if let Some(persona) = &prepared.persona {
        user.metadata
            .insert(META_PERSONA.into(), serde_json::json!(persona));
    }
    let element = StreamElement::message(user)
        .with_turn_id(turn_id)
        .with_conversation_id(conversation_id);
    if input.send(element).await.is_err() {
        return false;
    }

    for chunk in prepared.audio.chunks(CHUNK_BYTES) {
        let element = StreamElement::audio(AudioFrame::pcm16(chunk.to_vec()))
            .with_turn_id(turn_id)
            .with_conversation_id(conversation_id);
        if input.send(element).await.is_err() {
            return false;
        }
        if !prepared.burst {
            tokio::time::sleep(Duration::from_millis(CHUNK_MILLIS)).await;
        }
    }

    input
        .send(
            StreamElement::end_of_stream()
                .with_turn_id(turn_id)
                .with_conversation_id(conversation_id),
        )
        .await
        .is_ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct TurnCollection {
    completed: bool,
    session_ended: bool,
    timed_out: bool,
    error: Option<String>,
}

struct ResponseCollector {
    output: mpsc::Receiver<StreamElement>,
    feedback: mpsc::Sender<StreamElement>,
    tools: Arc<ToolRegistry>,
    conversation_id: String,
}

impl ResponseCollector {
    /// Discard elements left over from a previous turn.
    fn drain_stale(&mut self) {
        while self.output.try_recv().is_ok() {}
    }

    /// Read pipeline output until an end-of-stream element or an error.
    /// Provider tool-call batches are executed and their results fed
    /// back into the input channel.
    async fn collect_turn(&mut self, deadline: tokio::time::Instant) -> TurnCollection {
        loop {
            let element = match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Err(_) => {
                    return TurnCollection {
                        timed_out: true,
                        error: Some("turn deadline exceeded".into()),
                        ..Default::default()
                    }
                }
                Ok(None) => {
                    return TurnCollection {
                        session_ended: true,
                        error: Some(SESSION_ENDED_MESSAGE.into()),
                        ..Default::default()
                    }
                }
                Ok(Some(element)) => element,
            };

            match &element.payload {
                ElementPayload::EndOfStream => {
                    if !element.is_all_responses_received() {
                        return TurnCollection {
                            completed: true,
                            ..Default::default()
                        };
                    }
                }
                ElementPayload::Error { message } => {
                    return TurnCollection {
                        session_ended: element.meta_bool(meta::SESSION_ENDED),
                        error: Some(message.clone()),
                        ..Default::default()
                    };
                }
                ElementPayload::ToolCalls { calls } => {
                    for call in calls {
                        let result = self.tools.execute(&call.tool_name, &call.arguments).await;
                        let message = Message::tool_result(
                            &call.call_id,
                            &call.tool_name,
                            result.content(),
                            result.is_error(),
                        );
                        let mut feedback = StreamElement::message(message)
                            .with_conversation_id(&self.conversation_id);
                        if let Some(turn_id) = element.turn_id() {
                            feedback = feedback.with_turn_id(turn_id);
                        }
                        if self.feedback.send(feedback).await.is_err() {
                            tracing::warn!("tool result feedback dropped: pipeline closed");
                        }
                    }
                }
                // Message/Text/Audio responses were already persisted by
                // the save stage upstream.
                _ => {}
            }
        }
    }

    /// Consume remaining output so in-flight state-store writes finish.
    /// Bounded by its own window, never the scenario deadline.
    async fn drain(mut self, window: Duration) {
        drop(self.feedback);
        let _ = tokio::time::timeout(window, async {
            while self.output.recv().await.is_some() {}
        })
        .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session-end resilience
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Last-turn session end ignored by configuration: success.
    Ignored,
    /// Enough turns completed: partial success.
    Partial,
    Failed,
}

/// Precedence: the last-turn ignore flag is consulted first; otherwise
/// the partial-success threshold decides (a threshold of 0 accepts any
/// partial, including zero completed turns).
fn session_end_disposition(
    duplex: &DuplexConfig,
    completed_turns: usize,
    is_last_turn: bool,
) -> Disposition {
    if is_last_turn && completed_turns >= 1 && duplex.ignore_last_turn_session_end {
        return Disposition::Ignored;
    }
    if completed_turns as u32 >= duplex.partial_success_min_turns {
        return Disposition::Partial;
    }
    Disposition::Failed
}
