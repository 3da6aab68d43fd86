//! The engine facade consumed by the scheduler caller.
//!
//! Owns the state store, the registries, and the event bus, and passes
//! handles down to the conversation executors — executors never retain
//! references back to the scheduler. Mock-provider mode swaps this
//! engine's provider registry only; nothing is process-global.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use arena_domain::config::Configuration;
use arena_domain::error::Result;
use arena_domain::run::{RunPlan, RunResult};
use arena_events::{EventBus, SessionRecorder};
use arena_pipeline::{MediaStorage, PromptRegistry};
use arena_providers::mock::MockCatalog;
use arena_providers::ProviderRegistry;
use arena_store::StateStore;
use arena_tools::ToolRegistry;

use crate::adapters::AdapterRegistry;
use crate::composite::CompositeConversation;
use crate::duplex::DuplexConversation;
use crate::eval::EvalConversation;
use crate::evalhook::PackEvalHook;
use crate::media::FsMediaStorage;
use crate::plan::{PlanBuilder, PlanFilter};
use crate::prompts::StaticPromptRegistry;
use crate::scheduler::RunScheduler;
use crate::scripted::ScriptedConversation;
use crate::selfplay::SelfPlayRegistry;
use crate::tts::{ToneTts, TtsEngine};

pub struct Harness {
    config: Arc<Configuration>,
    store: Arc<StateStore>,
    bus: RwLock<Arc<EventBus>>,
    providers: RwLock<Arc<ProviderRegistry>>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<dyn PromptRegistry>,
    adapters: Arc<AdapterRegistry>,
    self_play: Arc<SelfPlayRegistry>,
    tts: Arc<dyn TtsEngine>,
    media: Arc<dyn MediaStorage>,
    hook: Arc<PackEvalHook>,
    recorder: RwLock<Option<SessionRecorder>>,
}

impl Harness {
    pub fn builder(config: Configuration) -> HarnessBuilder {
        HarnessBuilder::new(config)
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.read().clone()
    }

    /// Replace the event bus. Call before enabling session recording;
    /// recorders stay attached to the bus they were subscribed on.
    pub fn set_event_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write() = bus;
    }

    /// Expand filters into a flat, ordered run plan.
    pub fn generate_run_plan(&self, filter: &PlanFilter) -> Result<RunPlan> {
        let providers = self.providers.read().clone();
        PlanBuilder {
            config: &self.config,
            providers: &providers,
            adapters: &self.adapters,
        }
        .build(filter)
    }

    /// Execute a plan under the given concurrency cap (≥ 1). Returns the
    /// run IDs in plan order.
    pub async fn execute_runs(&self, plan: &RunPlan, concurrency: usize) -> Result<Vec<String>> {
        let bus = self.bus.read().clone();
        let providers = self.providers.read().clone();

        let scripted = Arc::new(ScriptedConversation {
            store: self.store.clone(),
            bus: bus.clone(),
            tools: self.tools.clone(),
            prompts: self.prompts.clone(),
            self_play: self.self_play.clone(),
            hook: self.hook.clone(),
            max_tool_iterations: self.config.max_tool_iterations,
        });
        let duplex = Arc::new(DuplexConversation {
            store: self.store.clone(),
            bus: bus.clone(),
            tools: self.tools.clone(),
            prompts: self.prompts.clone(),
            self_play: self.self_play.clone(),
            tts: self.tts.clone(),
            media: self.media.clone(),
            media_inline_threshold: self.config.media_inline_threshold,
        });
        let eval = Arc::new(EvalConversation {
            store: self.store.clone(),
            adapters: self.adapters.clone(),
            hook: self.hook.clone(),
        });
        let composite = Arc::new(CompositeConversation::new(
            Some(scripted),
            Some(duplex),
            Some(eval),
        ));

        let scheduler = RunScheduler {
            store: self.store.clone(),
            bus,
            config: self.config.clone(),
            providers,
            composite,
        };
        scheduler.execute(plan, concurrency).await
    }

    /// Reconstructed result view for a finished run.
    pub fn get_run_result(&self, run_id: &str) -> Result<RunResult> {
        self.store.get_run_result(run_id)
    }

    pub fn list_run_ids(&self) -> Vec<String> {
        self.store.list_run_ids()
    }

    /// Record every published event to one JSONL file per run.
    pub fn enable_session_recording(&self, dir: &Path) -> Result<()> {
        let recorder = SessionRecorder::new(dir)?;
        recorder.attach(&self.bus.read());
        tracing::info!(dir = %dir.display(), "session recording enabled");
        *self.recorder.write() = Some(recorder);
        Ok(())
    }

    /// Enable session recording when the configuration names a directory.
    pub fn configure_session_recording_from_config(&self) -> Result<()> {
        if let Some(dir) = self.config.recording_dir.clone() {
            self.enable_session_recording(&dir)?;
        }
        Ok(())
    }

    pub fn session_recorder(&self) -> Option<SessionRecorder> {
        self.recorder.read().clone()
    }

    /// Replace this engine's provider registry with mock providers from
    /// a YAML catalog.
    pub fn enable_mock_provider_mode(&self, config_path: &Path) -> Result<()> {
        let catalog = MockCatalog::from_yaml_file(config_path)?;
        let registry = catalog.into_registry();
        tracing::info!(
            providers = registry.len(),
            path = %config_path.display(),
            "mock provider mode enabled"
        );
        *self.providers.write() = Arc::new(registry);
        Ok(())
    }

    /// Release provider resources.
    pub async fn close(&self) -> Result<()> {
        let providers = self.providers.read().clone();
        providers.close_all().await;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HarnessBuilder {
    config: Configuration,
    providers: ProviderRegistry,
    tools: Option<Arc<ToolRegistry>>,
    prompts: Option<Arc<dyn PromptRegistry>>,
    adapters: Option<Arc<AdapterRegistry>>,
    self_play: Option<Arc<SelfPlayRegistry>>,
    tts: Option<Arc<dyn TtsEngine>>,
    media: Option<Arc<dyn MediaStorage>>,
    hook: Option<Arc<PackEvalHook>>,
    bus: Option<Arc<EventBus>>,
}

impl HarnessBuilder {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            providers: ProviderRegistry::new(),
            tools: None,
            prompts: None,
            adapters: None,
            self_play: None,
            tts: None,
            media: None,
            hook: None,
            bus: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn arena_providers::Provider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRegistry>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_self_play(mut self, self_play: Arc<SelfPlayRegistry>) -> Self {
        self.self_play = Some(self_play);
        self
    }

    pub fn with_tts(mut self, tts: Arc<dyn TtsEngine>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn with_media_storage(mut self, media: Arc<dyn MediaStorage>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_eval_hook(mut self, hook: Arc<PackEvalHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<Harness> {
        let media: Arc<dyn MediaStorage> = match self.media {
            Some(media) => media,
            None => Arc::new(FsMediaStorage::new(&self.config.media_dir)?),
        };
        let hook = match self.hook {
            Some(hook) => hook,
            None => Arc::new(PackEvalHook::new(self.config.pack_evals.clone())),
        };

        Ok(Harness {
            config: Arc::new(self.config),
            store: Arc::new(StateStore::new()),
            bus: RwLock::new(self.bus.unwrap_or_else(|| Arc::new(EventBus::new()))),
            providers: RwLock::new(Arc::new(self.providers)),
            tools: self.tools.unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            prompts: self.prompts.unwrap_or_else(|| {
                Arc::new(
                    StaticPromptRegistry::new()
                        .with_fallback("You are a helpful assistant under test."),
                )
            }),
            adapters: self
                .adapters
                .unwrap_or_else(|| Arc::new(AdapterRegistry::with_defaults())),
            self_play: self
                .self_play
                .unwrap_or_else(|| Arc::new(SelfPlayRegistry::new())),
            tts: self.tts.unwrap_or_else(|| Arc::new(ToneTts::new())),
            media,
            hook,
            recorder: RwLock::new(None),
        })
    }
}
