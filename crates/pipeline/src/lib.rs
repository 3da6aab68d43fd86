//! Composable streaming stages with typed elements.
//!
//! A [`Stage`] consumes a receive-only channel of
//! [`StreamElement`](arena_domain::element::StreamElement) and produces a
//! send-only channel; a [`Pipeline`] is a linear chain built by
//! [`PipelineBuilder`] that spawns one worker per stage.
//!
//! Stage contracts:
//!
//! - a worker closes its output exactly once: when its input closes after
//!   all pending elements are processed, or when the cancellation token
//!   fires. Workers never close inputs they do not own.
//! - elements flow in order per pipeline; stages may buffer internally
//!   but must not reorder across a turn boundary (`turn_id` metadata).
//! - errors travel as error-tagged elements and are forwarded unchanged
//!   by downstream stages.
//! - backpressure is the natural blocking of bounded channel sends.

pub mod audio;
pub mod stages;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::StreamElement;
use arena_domain::error::Result;

/// Bound of the channel between adjacent stages.
pub const STAGE_CHANNEL_CAPACITY: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator contracts consumed by stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved prompt for a task type.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    pub system_prompt: String,
}

/// Task-type to prompt resolution, consumed by the prompt-assembly stage
/// and the turn executor.
pub trait PromptRegistry: Send + Sync {
    fn load(&self, task_type: &str) -> Result<PromptBundle>;
}

/// Where an externalized media payload landed.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Append-only content-addressed media writer, consumed by the media
/// externalizer stage.
pub trait MediaStorage: Send + Sync {
    fn write(&self, media_type: &str, data: &[u8]) -> Result<StoredMedia>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage & pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of the chain. The worker owns its output sender and drops it
/// exactly once on return.
#[async_trait]
pub trait Stage: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    );
}

/// Receive the next element, aborting on cancellation.
pub async fn next_element(
    input: &mut mpsc::Receiver<StreamElement>,
    cancel: &CancellationToken,
) -> Option<StreamElement> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        element = input.recv() => element,
    }
}

/// Send downstream, aborting on cancellation. Returns `false` when the
/// element could not be delivered (cancelled or receiver gone); the
/// caller should stop processing.
pub async fn forward(
    output: &mpsc::Sender<StreamElement>,
    cancel: &CancellationToken,
    element: StreamElement,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = output.send(element) => sent.is_ok(),
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Spawn one worker per stage and return the final output channel.
    /// The caller owns (and eventually closes) the input sender.
    pub fn execute(
        self,
        cancel: CancellationToken,
        input: mpsc::Receiver<StreamElement>,
    ) -> mpsc::Receiver<StreamElement> {
        let mut upstream = input;
        for stage in self.stages {
            let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
            let stage_cancel = cancel.clone();
            let name = stage.name();
            tokio::spawn(async move {
                tracing::debug!(stage = name, "stage worker started");
                stage.run(stage_cancel, upstream, tx).await;
                tracing::debug!(stage = name, "stage worker finished");
            });
            upstream = rx;
        }
        upstream
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::element::ElementPayload;

    /// Test stage that uppercases text fragments and forwards the rest.
    struct Upper;

    #[async_trait]
    impl Stage for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        async fn run(
            self: Box<Self>,
            cancel: CancellationToken,
            mut input: mpsc::Receiver<StreamElement>,
            output: mpsc::Sender<StreamElement>,
        ) {
            while let Some(mut el) = next_element(&mut input, &cancel).await {
                if let ElementPayload::Text { text } = &el.payload {
                    el.payload = ElementPayload::Text {
                        text: text.to_uppercase(),
                    };
                }
                if !forward(&output, &cancel, el).await {
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn elements_flow_in_order_and_output_closes() {
        let (tx, rx) = mpsc::channel(8);
        let pipeline = Pipeline::builder().stage(Upper).stage(Upper).build();
        let mut out = pipeline.execute(CancellationToken::new(), rx);

        tx.send(StreamElement::text("one")).await.unwrap();
        tx.send(StreamElement::error("boom")).await.unwrap();
        tx.send(StreamElement::text("two")).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert!(matches!(first.payload, ElementPayload::Text { ref text } if text == "ONE"));
        let second = out.recv().await.unwrap();
        assert!(second.is_error());
        let third = out.recv().await.unwrap();
        assert!(matches!(third.payload, ElementPayload::Text { ref text } if text == "TWO"));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_closes_outputs() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::builder().stage(Upper).build();
        let mut out = pipeline.execute(cancel.clone(), rx);

        tx.send(StreamElement::text("hello")).await.unwrap();
        assert!(out.recv().await.is_some());

        cancel.cancel();
        // Worker aborts and drops its output; sender side stays open.
        assert!(out.recv().await.is_none());
        drop(tx);
    }
}
