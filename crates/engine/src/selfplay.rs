//! Self-play: generating the user side of a turn with a secondary model
//! acting under a persona.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use arena_domain::error::{Error, Result};
use arena_domain::message::{Message, Role};
use arena_providers::{PredictRequest, Provider};

#[async_trait]
pub trait SelfPlayGenerator: Send + Sync {
    /// Produce the user's next utterance given the persona and the
    /// conversation so far.
    async fn generate(&self, persona: &str, history: &[Message]) -> Result<String>;
}

/// Persona-keyed registry of generators with an optional default.
#[derive(Default)]
pub struct SelfPlayRegistry {
    generators: RwLock<HashMap<String, Arc<dyn SelfPlayGenerator>>>,
    fallback: RwLock<Option<Arc<dyn SelfPlayGenerator>>>,
}

impl SelfPlayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, persona: impl Into<String>, generator: Arc<dyn SelfPlayGenerator>) {
        self.generators.write().insert(persona.into(), generator);
    }

    pub fn set_default(&self, generator: Arc<dyn SelfPlayGenerator>) {
        *self.fallback.write() = Some(generator);
    }

    pub fn resolve(&self, persona: &str) -> Result<Arc<dyn SelfPlayGenerator>> {
        if let Some(generator) = self.generators.read().get(persona) {
            return Ok(generator.clone());
        }
        self.fallback
            .read()
            .clone()
            .ok_or_else(|| Error::Config(format!("no self-play generator for persona {persona:?}")))
    }

    pub fn has(&self, persona: &str) -> bool {
        self.generators.read().contains_key(persona) || self.fallback.read().is_some()
    }
}

/// Generator backed by a provider: the model is asked to speak as the
/// user, so the history is inverted (assistant turns become user turns
/// and vice versa) before prediction.
pub struct ProviderSelfPlay {
    provider: Arc<dyn Provider>,
}

impl ProviderSelfPlay {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    fn invert_history(history: &[Message]) -> Vec<Message> {
        history
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(Message::assistant(m.content.clone())),
                Role::Assistant => Some(Message::user(m.content.clone())),
                Role::System | Role::Tool => None,
            })
            .collect()
    }
}

#[async_trait]
impl SelfPlayGenerator for ProviderSelfPlay {
    async fn generate(&self, persona: &str, history: &[Message]) -> Result<String> {
        let mut messages = vec![Message::system(format!(
            "You are role-playing the human user of an assistant. \
             Persona: {persona}. Reply with the user's next utterance only, \
             no narration or quotes."
        ))];
        messages.extend(Self::invert_history(history));
        if messages.len() == 1 {
            messages.push(Message::user("Start the conversation.".to_string()));
        }

        let response = self
            .provider
            .predict(PredictRequest {
                messages,
                temperature: Some(0.9),
                ..Default::default()
            })
            .await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_providers::mock::{MockProvider, MockProviderConfig};

    struct Fixed(&'static str);

    #[async_trait]
    impl SelfPlayGenerator for Fixed {
        async fn generate(&self, _persona: &str, _history: &[Message]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn registry_resolution_order() {
        let registry = SelfPlayRegistry::new();
        assert!(registry.resolve("curious").is_err());
        assert!(!registry.has("curious"));

        registry.set_default(Arc::new(Fixed("default line")));
        assert!(registry.resolve("curious").is_ok());

        registry.register("curious", Arc::new(Fixed("persona line")));
        assert!(registry.resolve("curious").is_ok());
        assert!(registry.has("curious"));
    }

    #[test]
    fn history_inversion_swaps_speakers() {
        let history = vec![
            Message::system("prompt"),
            Message::user("hi"),
            Message::assistant("hello, how can I help?"),
            Message::tool_result("c1", "lookup", "ok", false),
        ];
        let inverted = ProviderSelfPlay::invert_history(&history);
        assert_eq!(inverted.len(), 2);
        assert_eq!(inverted[0].role, Role::Assistant);
        assert_eq!(inverted[0].content, "hi");
        assert_eq!(inverted[1].role, Role::User);
    }

    #[tokio::test]
    async fn provider_backed_generation() {
        let provider = Arc::new(MockProvider::new(MockProviderConfig::named("sp")));
        let generator = ProviderSelfPlay::new(provider);
        let text = generator.generate("curious", &[]).await.unwrap();
        assert!(!text.is_empty());
    }
}
