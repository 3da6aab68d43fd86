use tokio::sync::mpsc;

use arena_domain::audio::{SampleFormat, SAMPLE_RATE_HZ};
use arena_domain::element::StreamElement;
use arena_domain::error::{Error, Result};
use arena_domain::message::{CostBreakdown, Message};
use arena_domain::tool::{ToolCall, ToolDescriptor};
use arena_domain::BoxStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic prediction request.
#[derive(Debug, Clone, Default)]
pub struct PredictRequest {
    /// Conversation messages, oldest first (system prompt leading).
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDescriptor>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Sampling seed for providers that support it.
    pub seed: Option<u64>,
}

/// A provider-agnostic prediction response.
#[derive(Debug, Clone)]
pub struct PredictResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// The reason generation stopped (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

/// Token usage for one exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Advertised capabilities of a provider instance.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    /// Group the provider belongs to for plan resolution.
    pub group: String,
    /// Free-form capability tags matched against scenario requirements.
    pub capabilities: Vec<String>,
    /// Whether the provider accepts real-time streaming audio input.
    pub streaming_input: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            group: "default".into(),
            capabilities: Vec::new(),
            streaming_input: false,
        }
    }
}

impl ProviderCapabilities {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Configuration handed to a provider when opening a duplex session.
#[derive(Debug, Clone)]
pub struct StreamingInputConfig {
    pub system_prompt: Option<String>,
    pub sample_rate_hz: u32,
    pub format: SampleFormat,
    pub tools: Vec<ToolDescriptor>,
}

impl Default for StreamingInputConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            sample_rate_hz: SAMPLE_RATE_HZ,
            format: SampleFormat::PcmS16Le,
            tools: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Control messages for a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// No more input for the current turn (turn_complete).
    EndInput,
    /// Release underlying resources.
    Close,
}

/// Handle on one live bidirectional session with a streaming provider.
///
/// A provider implementation constructs the session from three channels
/// and services them in its own task: elements sent on the input channel
/// are fed to the vendor, provider-produced elements arrive on the
/// output channel, and [`SessionControl`] messages signal turn and
/// session boundaries. The output channel closing means the session has
/// ended on the provider side.
pub struct ProviderSession {
    input: mpsc::Sender<StreamElement>,
    output: Option<mpsc::Receiver<StreamElement>>,
    control: mpsc::Sender<SessionControl>,
}

impl ProviderSession {
    pub fn new(
        input: mpsc::Sender<StreamElement>,
        output: mpsc::Receiver<StreamElement>,
        control: mpsc::Sender<SessionControl>,
    ) -> Self {
        Self {
            input,
            output: Some(output),
            control,
        }
    }

    /// A clone of the input sender for feeding elements into the session.
    pub fn input_sender(&self) -> mpsc::Sender<StreamElement> {
        self.input.clone()
    }

    /// Take ownership of the output receiver. Yields `Some` exactly once.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<StreamElement>> {
        self.output.take()
    }

    /// Signal that the current turn's input is complete.
    pub async fn end_input(&self) -> Result<()> {
        self.control
            .send(SessionControl::EndInput)
            .await
            .map_err(|_| Error::SessionEnded)
    }

    /// Release the session. Safe to call after the session already ended.
    pub async fn close(&self) {
        let _ = self.control.send(SessionControl::Close).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability interface every model adapter implements. Transports
/// (HTTP, WebSocket) live outside the core.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Unique identifier for this provider instance.
    fn id(&self) -> &str;

    /// The advertised capabilities of this provider instance.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send a prediction request and wait for the full response.
    async fn predict(&self, req: PredictRequest) -> Result<PredictResponse>;

    /// Send a prediction request and return a stream of elements.
    async fn predict_stream(
        &self,
        _req: PredictRequest,
    ) -> Result<BoxStream<'static, Result<StreamElement>>> {
        Err(Error::provider(self.id(), "streaming not supported"))
    }

    /// Whether [`Provider::predict_stream`] is available.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Derive a cost breakdown from token counts.
    fn calculate_cost(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
    ) -> CostBreakdown;

    /// Open a bidirectional streaming session.
    async fn create_stream_session(
        &self,
        _config: StreamingInputConfig,
    ) -> Result<ProviderSession> {
        Err(Error::provider(self.id(), "streaming input not supported"))
    }

    /// Release held resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_matching() {
        let caps = ProviderCapabilities {
            group: "realtime".into(),
            capabilities: vec!["chat".into(), "audio".into()],
            streaming_input: true,
        };
        assert!(caps.has("audio"));
        assert!(!caps.has("vision"));
    }

    #[test]
    fn usage_total() {
        let u = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            cached_tokens: 2,
        };
        assert_eq!(u.total(), 15);
    }

    #[tokio::test]
    async fn session_take_output_is_once() {
        let (in_tx, _in_rx) = mpsc::channel(4);
        let (_out_tx, out_rx) = mpsc::channel(4);
        let (ctl_tx, _ctl_rx) = mpsc::channel(4);
        let mut session = ProviderSession::new(in_tx, out_rx, ctl_tx);
        assert!(session.take_output().is_some());
        assert!(session.take_output().is_none());
    }

    #[tokio::test]
    async fn end_input_after_session_death_is_session_ended() {
        let (in_tx, _in_rx) = mpsc::channel(4);
        let (_out_tx, out_rx) = mpsc::channel(4);
        let (ctl_tx, ctl_rx) = mpsc::channel(4);
        drop(ctl_rx);
        let session = ProviderSession::new(in_tx, out_rx, ctl_tx);
        assert!(matches!(
            session.end_input().await.unwrap_err(),
            Error::SessionEnded
        ));
    }
}
