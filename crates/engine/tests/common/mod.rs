//! Shared stubs for the integration suites.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use arena_domain::error::{Error, Result};
use arena_domain::message::{CostBreakdown, Message};
use arena_providers::{
    PredictRequest, PredictResponse, Provider, ProviderCapabilities, Usage,
};

/// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tracks how many workers are inside `predict` at once.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max_seen(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Deterministic provider: fixed reply, fixed per-exchange cost.
pub struct StubProvider {
    id: String,
    capabilities: ProviderCapabilities,
    reply: String,
    per_turn_cost: f64,
    delay: Duration,
    calls: AtomicUsize,
    probe: Option<Arc<ConcurrencyProbe>>,
    fail_always: bool,
}

impl StubProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            capabilities: ProviderCapabilities::default(),
            reply: "acknowledged".to_owned(),
            per_turn_cost: 0.0015,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            probe: None,
            fail_always: false,
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_owned();
        self
    }

    pub fn with_cost(mut self, per_turn_cost: f64) -> Self {
        self.per_turn_cost = per_turn_cost;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_always = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn predict(&self, _req: PredictRequest) -> Result<PredictResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        if self.fail_always {
            return Err(Error::provider(&self.id, "stubbed failure"));
        }
        Ok(PredictResponse {
            content: self.reply.clone(),
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                cached_tokens: 0,
            }),
            finish_reason: Some("stop".into()),
        })
    }

    fn calculate_cost(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
    ) -> CostBreakdown {
        CostBreakdown {
            input_tokens,
            output_tokens,
            cached_tokens,
            input_cost: self.per_turn_cost / 2.0,
            output_cost: self.per_turn_cost / 2.0,
            total_cost: self.per_turn_cost,
        }
    }
}

/// Self-play generator that counts invocations.
pub struct CountingSelfPlay {
    pub line: String,
    pub calls: AtomicUsize,
}

impl CountingSelfPlay {
    pub fn new(line: &str) -> Arc<Self> {
        Arc::new(Self {
            line: line.to_owned(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl arena_engine::selfplay::SelfPlayGenerator for CountingSelfPlay {
    async fn generate(&self, _persona: &str, _history: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.line.clone())
    }
}
