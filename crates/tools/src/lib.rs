//! Tool registry — lookup and execution of named tools.
//!
//! Tool executors (skills, remote agents) live outside the core; the
//! registry holds descriptors plus executor handles and turns execution
//! failures into [`ToolOutcome::error`] rather than aborting the run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use arena_domain::error::Result;
use arena_domain::tool::ToolDescriptor;

/// What a tool execution produced. Exactly one of `result` / `error` is
/// set; errors are recorded on the tool-result message, never raised.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Render the outcome as message content.
    pub fn content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Executes one named tool.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Adapter for closure-backed tools (used heavily by tests and stubs).
pub struct FnTool<F>(pub F);

#[async_trait::async_trait]
impl<F> ToolExecutor for FnTool<F>
where
    F: Fn(&serde_json::Value) -> Result<serde_json::Value> + Send + Sync,
{
    async fn execute(&self, arguments: &serde_json::Value) -> Result<serde_json::Value> {
        (self.0)(arguments)
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    executor: Arc<dyn ToolExecutor>,
}

/// Registry of named tools. Registration happens at setup time; lookup
/// and execution are safe for concurrent use.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ToolDescriptor, executor: Arc<dyn ToolExecutor>) {
        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.tools.write().insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                executor,
            },
        );
    }

    /// All registered descriptors, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read();
        let mut descriptors: Vec<ToolDescriptor> =
            tools.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).map(|t| t.descriptor.clone())
    }

    /// Execute a named tool. Unknown tools and executor failures both
    /// surface as error outcomes.
    pub async fn execute(&self, name: &str, arguments: &serde_json::Value) -> ToolOutcome {
        let executor = match self.tools.read().get(name) {
            Some(tool) => tool.executor.clone(),
            None => return ToolOutcome::err(format!("tool not found: {name}")),
        };
        match executor.execute(arguments).await {
            Ok(value) => ToolOutcome::ok(value),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::err(e.to_string())
            }
        }
    }
}
