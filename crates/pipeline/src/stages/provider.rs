//! Bridge between the pipeline and a streaming provider session.
//!
//! Holds a single lazily-created session. Audio frames, text fragments,
//! and tool-call batches are forwarded into the session; message
//! elements go both into the session (context) and downstream (so the
//! save stage persists them); provider-produced elements are re-emitted
//! downstream. An end-of-stream input signals turn_complete; the
//! end-of-run sentinel (`all_responses_received`) closes the session.
//! The session's system prompt is read from the first element's metadata
//! at creation time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{meta, ElementPayload, StreamElement};
use arena_providers::{Provider, ProviderSession, StreamingInputConfig};

use crate::{forward, Stage};

/// Error message carried by the element emitted when the provider
/// session ends before the conversation does.
pub const SESSION_ENDED_MESSAGE: &str = "provider session ended";

pub struct DuplexProvider {
    provider: Arc<dyn Provider>,
    config: StreamingInputConfig,
}

impl DuplexProvider {
    pub fn new(provider: Arc<dyn Provider>, config: StreamingInputConfig) -> Self {
        Self { provider, config }
    }
}

enum Step {
    Cancelled,
    In(Option<StreamElement>),
    Out(Option<StreamElement>),
}

#[async_trait]
impl Stage for DuplexProvider {
    fn name(&self) -> &'static str {
        "duplex_provider"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        let mut session: Option<ProviderSession> = None;
        let mut session_in: Option<mpsc::Sender<StreamElement>> = None;
        let mut session_out: Option<mpsc::Receiver<StreamElement>> = None;
        let mut session_dead = false;
        let mut end_announced = false;
        // Audio forwarded since the last end_input. Guards against a
        // duplicate turn_complete when a VAD boundary marker and the
        // producer's explicit marker both arrive for the same turn.
        let mut audio_since_end = false;

        loop {
            let step = if let Some(out_rx) = session_out.as_mut() {
                tokio::select! {
                    _ = cancel.cancelled() => Step::Cancelled,
                    el = input.recv() => Step::In(el),
                    el = out_rx.recv() => Step::Out(el),
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => Step::Cancelled,
                    el = input.recv() => Step::In(el),
                }
            };

            match step {
                Step::Cancelled => return,
                Step::In(None) => break,
                Step::In(Some(element)) => {
                    if session.is_none() && !session_dead {
                        let mut config = self.config.clone();
                        if config.system_prompt.is_none() {
                            config.system_prompt = element.system_prompt().map(str::to_owned);
                        }
                        match self.provider.create_stream_session(config).await {
                            Ok(mut created) => {
                                session_in = Some(created.input_sender());
                                session_out = created.take_output();
                                session = Some(created);
                                tracing::debug!(
                                    provider_id = %self.provider.id(),
                                    "duplex session created"
                                );
                            }
                            Err(e) => {
                                session_dead = true;
                                end_announced = true;
                                let error = StreamElement::error(format!(
                                    "pipeline: create stream session: {e}"
                                ))
                                .with_meta(meta::SESSION_ENDED, serde_json::json!(true));
                                if !forward(&output, &cancel, error).await {
                                    return;
                                }
                            }
                        }
                    }

                    match &element.payload {
                        ElementPayload::Audio { .. }
                        | ElementPayload::Text { .. }
                        | ElementPayload::ToolCalls { .. } => {
                            let is_audio = matches!(element.payload, ElementPayload::Audio { .. });
                            if let Some(tx) = &session_in {
                                if !session_dead && tx.send(element).await.is_err() {
                                    session_dead = true;
                                } else if is_audio {
                                    audio_since_end = true;
                                }
                            }
                        }
                        ElementPayload::Message { .. } => {
                            if let Some(tx) = &session_in {
                                if !session_dead && tx.send(element.clone()).await.is_err() {
                                    session_dead = true;
                                }
                            }
                            if !forward(&output, &cancel, element).await {
                                return;
                            }
                        }
                        ElementPayload::EndOfStream => {
                            if element.is_all_responses_received() {
                                if let Some(s) = &session {
                                    s.close().await;
                                }
                                session_in = None;
                                if !forward(&output, &cancel, element).await {
                                    return;
                                }
                            } else if session_dead {
                                // A turn attempted against a dead session:
                                // surface the condition for its collector.
                                let error = StreamElement::error(SESSION_ENDED_MESSAGE)
                                    .with_meta(meta::SESSION_ENDED, serde_json::json!(true));
                                if !forward(&output, &cancel, error).await {
                                    return;
                                }
                            } else if let Some(s) = &session {
                                if audio_since_end {
                                    audio_since_end = false;
                                    if s.end_input().await.is_err() {
                                        session_dead = true;
                                    }
                                }
                            }
                        }
                        ElementPayload::Error { .. } => {
                            if !forward(&output, &cancel, element).await {
                                return;
                            }
                        }
                    }
                }
                Step::Out(Some(element)) => {
                    if !forward(&output, &cancel, element).await {
                        return;
                    }
                }
                Step::Out(None) => {
                    session_out = None;
                    session_dead = true;
                    if !end_announced {
                        end_announced = true;
                        tracing::debug!(
                            provider_id = %self.provider.id(),
                            "duplex session ended by provider"
                        );
                        let error = StreamElement::error(SESSION_ENDED_MESSAGE)
                            .with_meta(meta::SESSION_ENDED, serde_json::json!(true));
                        if !forward(&output, &cancel, error).await {
                            return;
                        }
                    }
                }
            }
        }

        // Input closed: release the session, then drain its remaining
        // output downstream so late responses are not lost.
        if let Some(s) = session.take() {
            s.close().await;
        }
        drop(session_in);
        if let Some(mut out_rx) = session_out.take() {
            loop {
                let element = tokio::select! {
                    _ = cancel.cancelled() => None,
                    el = out_rx.recv() => el,
                };
                match element {
                    Some(el) => {
                        if !forward(&output, &cancel, el).await {
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::audio::{AudioFrame, CHUNK_BYTES};
    use arena_domain::message::{Message, Role};
    use arena_providers::mock::{MockProvider, MockProviderConfig};

    fn streaming_provider(end_after_turns: u32) -> Arc<dyn Provider> {
        let mut cfg = MockProviderConfig::named("rt");
        cfg.streaming_input = true;
        cfg.duplex.end_after_turns = end_after_turns;
        Arc::new(MockProvider::new(cfg))
    }

    async fn send_turn(tx: &mpsc::Sender<StreamElement>, turn_id: &str) {
        tx.send(
            StreamElement::message(Message::user("spoken input")).with_turn_id(turn_id),
        )
        .await
        .unwrap();
        tx.send(
            StreamElement::audio(AudioFrame::pcm16(vec![0u8; CHUNK_BYTES]))
                .with_turn_id(turn_id),
        )
        .await
        .unwrap();
        tx.send(StreamElement::end_of_stream().with_turn_id(turn_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn turn_produces_user_message_reply_and_boundary() {
        let (tx, rx) = mpsc::channel(32);
        let stage = DuplexProvider::new(streaming_provider(0), StreamingInputConfig::default());
        let mut out = crate::Pipeline::builder()
            .stage(stage)
            .build()
            .execute(CancellationToken::new(), rx);

        send_turn(&tx, "t-1").await;

        // The forwarded user message comes first.
        let first = out.recv().await.unwrap();
        match &first.payload {
            ElementPayload::Message { message } => assert_eq!(message.role, Role::User),
            other => panic!("unexpected element: {other:?}"),
        }

        // Then the provider reply and the turn boundary.
        let mut saw_assistant = false;
        loop {
            let el = out.recv().await.unwrap();
            match &el.payload {
                ElementPayload::Message { message } if message.role == Role::Assistant => {
                    saw_assistant = true;
                }
                ElementPayload::EndOfStream => break,
                _ => {}
            }
        }
        assert!(saw_assistant);
        drop(tx);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn session_end_emits_tagged_error() {
        let (tx, rx) = mpsc::channel(32);
        let stage = DuplexProvider::new(streaming_provider(1), StreamingInputConfig::default());
        let mut out = crate::Pipeline::builder()
            .stage(stage)
            .build()
            .execute(CancellationToken::new(), rx);

        send_turn(&tx, "t-1").await;

        // First turn completes normally, then the session closes.
        let mut saw_session_end = false;
        let mut eos_seen = 0;
        while let Some(el) = out.recv().await {
            if el.is_end_of_stream() {
                eos_seen += 1;
            }
            if el.is_error() && el.meta_bool(meta::SESSION_ENDED) {
                saw_session_end = true;
                break;
            }
        }
        assert_eq!(eos_seen, 1);
        assert!(saw_session_end);
        drop(tx);
    }

    #[tokio::test]
    async fn non_streaming_provider_fails_session_creation() {
        let provider: Arc<dyn Provider> =
            Arc::new(MockProvider::new(MockProviderConfig::named("plain")));
        let (tx, rx) = mpsc::channel(8);
        let stage = DuplexProvider::new(provider, StreamingInputConfig::default());
        let mut out = crate::Pipeline::builder()
            .stage(stage)
            .build()
            .execute(CancellationToken::new(), rx);

        tx.send(StreamElement::audio(AudioFrame::pcm16(vec![0u8; CHUNK_BYTES])))
            .await
            .unwrap();
        drop(tx);

        let el = out.recv().await.unwrap();
        assert!(el.is_error());
        assert!(el.meta_bool(meta::SESSION_ENDED));
    }
}
