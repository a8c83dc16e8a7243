//! Error Types

use thiserror::Error;

/// Result type alias for bot operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Bot error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing construction argument, missing env var, unknown adapter
    #[error("Configuration error: {0}")]
    Config(String),

    /// State update rejected by the schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reply referenced a callback that is not registered
    #[error("Invalid callback {matched_callback:?}; valid callbacks: {valid_callbacks:?}")]
    InvalidCallback {
        valid_callbacks: Vec<String>,
        matched_callback: String,
    },

    /// Callback handler failed or was called with bad parameters
    #[error("Callback '{name}' failed: {message}")]
    CallbackExecution { name: String, message: String },

    /// Malformed protocol payload (state JSON, markup arguments)
    #[error("Parse error: {0}")]
    Parse(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Callback follow-up loop did not settle
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Build the error for a required argument that was not supplied.
    pub fn missing_argument(name: &str) -> Self {
        AgentError::Config(format!("missing required argument: {}", name))
    }

    /// Errors the orchestrator reports back into the conversation so the
    /// model can correct itself, instead of raising them to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidCallback { .. } | AgentError::CallbackExecution { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_) | AgentError::RateLimited(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Config(msg) => format!("The bot is misconfigured: {}", msg),
            AgentError::Provider(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            AgentError::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            AgentError::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            AgentError::MaxIterations(_) => "The request took too many steps to complete. Please try again.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
