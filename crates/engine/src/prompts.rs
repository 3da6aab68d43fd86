//! Static prompt registry.

use std::collections::HashMap;

use arena_domain::error::{Error, Result};
use arena_pipeline::{PromptBundle, PromptRegistry};

/// In-memory task-type → system-prompt map with an optional fallback.
#[derive(Default)]
pub struct StaticPromptRegistry {
    prompts: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticPromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, task_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.prompts.insert(task_type.into(), prompt.into());
        self
    }

    pub fn with_fallback(mut self, prompt: impl Into<String>) -> Self {
        self.fallback = Some(prompt.into());
        self
    }
}

impl PromptRegistry for StaticPromptRegistry {
    fn load(&self, task_type: &str) -> Result<PromptBundle> {
        let system_prompt = self
            .prompts
            .get(task_type)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| Error::Config(format!("no prompt for task type {task_type:?}")))?;
        Ok(PromptBundle { system_prompt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_with_fallback() {
        let registry = StaticPromptRegistry::new()
            .with_prompt("support", "you are a support agent")
            .with_fallback("you are helpful");
        assert_eq!(
            registry.load("support").unwrap().system_prompt,
            "you are a support agent"
        );
        assert_eq!(
            registry.load("unknown").unwrap().system_prompt,
            "you are helpful"
        );
    }

    #[test]
    fn missing_without_fallback_errors() {
        let registry = StaticPromptRegistry::new();
        assert!(registry.load("anything").is_err());
    }
}
