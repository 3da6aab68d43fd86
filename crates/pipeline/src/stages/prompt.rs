//! Prompt assembly.
//!
//! The first element seen triggers resolution of the scenario's task
//! type against the prompt registry; the resolved system prompt is
//! injected into element metadata under `system_prompt`. Elements are
//! never swallowed, including when resolution fails.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{meta, StreamElement};

use crate::{forward, next_element, PromptRegistry, Stage};

pub struct PromptAssembly {
    registry: Arc<dyn PromptRegistry>,
    task_type: String,
}

impl PromptAssembly {
    pub fn new(registry: Arc<dyn PromptRegistry>, task_type: impl Into<String>) -> Self {
        Self {
            registry,
            task_type: task_type.into(),
        }
    }
}

#[async_trait]
impl Stage for PromptAssembly {
    fn name(&self) -> &'static str {
        "prompt_assembly"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        let mut resolved: Option<String> = None;
        let mut resolution_failed = false;

        while let Some(mut element) = next_element(&mut input, &cancel).await {
            if resolved.is_none() && !resolution_failed {
                match self.registry.load(&self.task_type) {
                    Ok(bundle) => resolved = Some(bundle.system_prompt),
                    Err(e) => {
                        resolution_failed = true;
                        tracing::warn!(
                            task_type = %self.task_type,
                            error = %e,
                            "prompt resolution failed"
                        );
                        if !forward(
                            &output,
                            &cancel,
                            StreamElement::error(format!(
                                "pipeline: prompt resolution for {}: {e}",
                                self.task_type
                            )),
                        )
                        .await
                        {
                            return;
                        }
                    }
                }
            }

            if let Some(prompt) = &resolved {
                if element.system_prompt().is_none() {
                    element.set_meta(meta::SYSTEM_PROMPT, serde_json::json!(prompt));
                }
            }

            if !forward(&output, &cancel, element).await {
                return;
            }
        }
    }
}
