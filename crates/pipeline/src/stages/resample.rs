//! Transport-format conversion ahead of the provider stage.
//!
//! Audio frames that are not already 16-kHz 16-bit mono PCM are
//! resampled; everything else passes through untouched.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{ElementPayload, StreamElement};

use crate::audio::resample_to_transport;
use crate::{forward, next_element, Stage};

#[derive(Default)]
pub struct Resample;

#[async_trait]
impl Stage for Resample {
    fn name(&self) -> &'static str {
        "resample"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        while let Some(mut element) = next_element(&mut input, &cancel).await {
            if let ElementPayload::Audio { frame } = &element.payload {
                if !frame.is_transport_format() {
                    element.payload = ElementPayload::Audio {
                        frame: resample_to_transport(frame),
                    };
                }
            }
            if !forward(&output, &cancel, element).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::audio::{AudioFrame, SampleFormat, SAMPLE_RATE_HZ};

    #[tokio::test]
    async fn converts_only_non_transport_frames() {
        let (tx, rx) = mpsc::channel(8);
        let mut out = crate::Pipeline::builder()
            .stage(Resample)
            .build()
            .execute(CancellationToken::new(), rx);

        tx.send(StreamElement::audio(AudioFrame {
            data: vec![0u8; 1280],
            sample_rate: 32_000,
            channels: 1,
            format: SampleFormat::PcmS16Le,
        }))
        .await
        .unwrap();
        tx.send(StreamElement::text("untouched")).await.unwrap();
        drop(tx);

        match out.recv().await.unwrap().payload {
            ElementPayload::Audio { frame } => {
                assert_eq!(frame.sample_rate, SAMPLE_RATE_HZ);
                assert_eq!(frame.sample_count(), 320);
            }
            other => panic!("unexpected element: {other:?}"),
        }
        assert!(matches!(
            out.recv().await.unwrap().payload,
            ElementPayload::Text { .. }
        ));
    }
}
