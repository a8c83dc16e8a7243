//! # skillbot-runtime
//!
//! Provider transports for skillbot, selected from environment configuration.
//!
//! ## Providers
//!
//! - **OpenAI**: `/chat/completions`, with image parts and reasoning effort
//! - **Anthropic**: `/v1/messages`, with base64 image blocks and extended thinking
//! - **Ollama** (feature `ollama`, default): local inference via `ollama-rs`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skillbot_runtime::{build_adapter, AdapterConfig};
//!
//! let config = AdapterConfig::from_env()?;
//! let orchestrator = Orchestrator::builder()
//!     .adapter(build_adapter(&config)?)
//!     .memory_limit(config.memory_limit)
//!     .build()?;
//! ```

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

pub mod anthropic;
pub mod config;
mod http;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicTransport;
pub use config::{AdapterConfig, AdapterKind};
#[cfg(feature = "ollama")]
pub use ollama::OllamaTransport;
pub use openai::OpenAiTransport;

// Re-export core types for convenience
pub use skillbot_core::{
    AgentError, ChatTransport, LlmAdapter, Orchestrator, ProviderAdapter, Result, SendOptions,
};

/// Build the transport for `config.kind` and wrap it in a [`ProviderAdapter`]
pub fn build_adapter(config: &AdapterConfig) -> Result<Arc<ProviderAdapter>> {
    let transport: Arc<dyn ChatTransport> = match config.kind {
        AdapterKind::OpenAi => Arc::new(OpenAiTransport::new(api_key(config)?, &config.base_url)?),
        AdapterKind::Anthropic => {
            Arc::new(AnthropicTransport::new(api_key(config)?, &config.base_url)?)
        }
        AdapterKind::Ollama => ollama_transport(config)?,
    };

    tracing::info!(
        provider = %transport.name(),
        model = %config.model,
        "LLM adapter ready"
    );

    Ok(Arc::new(
        ProviderAdapter::new(transport, config.model.clone())
            .with_reasoning_effort(config.reasoning_effort),
    ))
}

fn api_key(config: &AdapterConfig) -> Result<SecretString> {
    config
        .api_key
        .as_ref()
        .map(|key| SecretString::from(key.expose_secret().to_string()))
        .ok_or_else(|| AgentError::Config(format!("LLM_API_KEY is required for {}", config.kind)))
}

#[cfg(feature = "ollama")]
fn ollama_transport(config: &AdapterConfig) -> Result<Arc<dyn ChatTransport>> {
    Ok(Arc::new(OllamaTransport::from_base_url(&config.base_url)?))
}

#[cfg(not(feature = "ollama"))]
fn ollama_transport(_config: &AdapterConfig) -> Result<Arc<dyn ChatTransport>> {
    Err(AgentError::Config(
        "the ollama adapter requires the `ollama` feature".into(),
    ))
}
