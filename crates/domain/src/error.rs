/// How an error should be treated by callers that distinguish retryable
/// from terminal failures (the store and the scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The addressed entity does not exist.
    NotFound,
    /// Transient condition (timeouts, cancellation, I/O hiccups).
    Transient,
    /// Terminal; the scheduler never retries on this class.
    Fatal,
}

/// Shared error type used across all arena crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store: conversation not found: {0}")]
    NotFound(String),

    #[error("store: {0}")]
    Store(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// The streaming provider session ended before the conversation did.
    /// Routed through the duplex resilience policy rather than failing
    /// the run outright.
    #[error("provider session ended")]
    SessionEnded,

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("pipeline: {0}")]
    Pipeline(String),

    #[error("plan: {0}")]
    Plan(String),

    #[error("adapter: {0}")]
    Adapter(String),

    #[error("config: {0}")]
    Config(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify the error for retry / failure decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::Timeout(_) | Error::Cancelled(_) | Error::SessionEnded | Error::Io(_) => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
