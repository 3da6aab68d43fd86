//! Voice-activity-detection turn segmentation.
//!
//! Tracks speech/silence durations over incoming audio frames and emits
//! an end-of-stream marker at detected turn boundaries: after
//! `silence_duration_ms` of trailing silence once at least
//! `min_speech_duration_ms` of speech was heard, or unconditionally when
//! `max_turn_duration_ms` is exceeded. All frames are forwarded.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{ElementPayload, StreamElement};
use arena_domain::scenario::VadConfig;

use crate::audio::rms_level;
use crate::{forward, next_element, Stage};

/// Normalised RMS above which a frame counts as speech.
const SPEECH_LEVEL: f64 = 0.015;

pub struct AudioTurn {
    config: VadConfig,
}

impl AudioTurn {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }
}

#[derive(Default)]
struct VadState {
    speech_ms: u64,
    silence_ms: u64,
    turn_ms: u64,
}

impl VadState {
    fn reset(&mut self) {
        *self = VadState::default();
    }
}

#[async_trait]
impl Stage for AudioTurn {
    fn name(&self) -> &'static str {
        "audio_turn"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        let mut state = VadState::default();

        while let Some(element) = next_element(&mut input, &cancel).await {
            let boundary_meta = match &element.payload {
                ElementPayload::Audio { frame } => {
                    let duration = frame.duration_ms();
                    state.turn_ms += duration;
                    if rms_level(frame) > SPEECH_LEVEL {
                        state.speech_ms += duration;
                        state.silence_ms = 0;
                    } else if state.speech_ms > 0 {
                        state.silence_ms += duration;
                    }

                    let silence_boundary = state.speech_ms >= self.config.min_speech_duration_ms
                        && state.silence_ms >= self.config.silence_duration_ms;
                    let length_boundary = state.turn_ms >= self.config.max_turn_duration_ms;
                    if silence_boundary || length_boundary {
                        Some(element.turn_id().map(str::to_owned))
                    } else {
                        None
                    }
                }
                ElementPayload::EndOfStream => {
                    // Explicit upstream boundary: reset and pass through.
                    state.reset();
                    None
                }
                _ => None,
            };

            if !forward(&output, &cancel, element).await {
                return;
            }

            if let Some(turn_id) = boundary_meta {
                state.reset();
                let mut marker = StreamElement::end_of_stream();
                if let Some(id) = turn_id {
                    marker = marker.with_turn_id(&id);
                }
                if !forward(&output, &cancel, marker).await {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::audio::AudioFrame;

    fn speech_frame() -> AudioFrame {
        let mut data = Vec::new();
        for _ in 0..320 {
            data.extend_from_slice(&(12_000i16).to_le_bytes());
        }
        AudioFrame::pcm16(data)
    }

    fn silence_frame() -> AudioFrame {
        AudioFrame::pcm16(vec![0u8; 640])
    }

    fn vad() -> VadConfig {
        VadConfig {
            silence_duration_ms: 60,
            min_speech_duration_ms: 40,
            max_turn_duration_ms: 10_000,
        }
    }

    #[tokio::test]
    async fn emits_boundary_after_trailing_silence() {
        let (tx, rx) = mpsc::channel(32);
        let mut out = crate::Pipeline::builder()
            .stage(AudioTurn::new(vad()))
            .build()
            .execute(CancellationToken::new(), rx);

        // 3 speech frames (60 ms), then 3 silence frames (60 ms).
        for _ in 0..3 {
            tx.send(StreamElement::audio(speech_frame()).with_turn_id("t-1"))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            tx.send(StreamElement::audio(silence_frame()).with_turn_id("t-1"))
                .await
                .unwrap();
        }
        drop(tx);

        let mut frames = 0;
        let mut boundaries = 0;
        while let Some(el) = out.recv().await {
            match el.payload {
                ElementPayload::Audio { .. } => frames += 1,
                ElementPayload::EndOfStream => {
                    boundaries += 1;
                    assert_eq!(el.turn_id(), Some("t-1"));
                }
                other => panic!("unexpected element: {other:?}"),
            }
        }
        assert_eq!(frames, 6, "all frames are forwarded");
        assert_eq!(boundaries, 1);
    }

    #[tokio::test]
    async fn silence_only_never_segments() {
        let (tx, rx) = mpsc::channel(32);
        let mut out = crate::Pipeline::builder()
            .stage(AudioTurn::new(vad()))
            .build()
            .execute(CancellationToken::new(), rx);

        for _ in 0..10 {
            tx.send(StreamElement::audio(silence_frame())).await.unwrap();
        }
        drop(tx);

        let mut boundaries = 0;
        while let Some(el) = out.recv().await {
            if el.is_end_of_stream() {
                boundaries += 1;
            }
        }
        assert_eq!(boundaries, 0);
    }

    #[tokio::test]
    async fn max_turn_duration_forces_boundary() {
        let (tx, rx) = mpsc::channel(64);
        let config = VadConfig {
            silence_duration_ms: 10_000,
            min_speech_duration_ms: 40,
            max_turn_duration_ms: 100,
        };
        let mut out = crate::Pipeline::builder()
            .stage(AudioTurn::new(config))
            .build()
            .execute(CancellationToken::new(), rx);

        for _ in 0..6 {
            tx.send(StreamElement::audio(speech_frame())).await.unwrap();
        }
        drop(tx);

        let mut boundaries = 0;
        while let Some(el) = out.recv().await {
            if el.is_end_of_stream() {
                boundaries += 1;
            }
        }
        assert_eq!(boundaries, 1, "120 ms of speech crosses the 100 ms cap once");
    }
}
