//! Ollama Chat Transport
//!
//! Implementation of `ChatTransport` for local Ollama inference. Server
//! settings are always available; the transport needs the `ollama` feature.

#[cfg(feature = "ollama")]
use async_trait::async_trait;
#[cfg(feature = "ollama")]
use ollama_rs::{
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage},
        images::Image,
    },
    Ollama,
};
use reqwest::Url;
#[cfg(feature = "ollama")]
use skillbot_core::provider::{ChatRequest, ChatTransport};
use skillbot_core::{AgentError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Ollama server location
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Scheme and host, e.g. "http://localhost"
    pub host: String,

    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    /// Split a base URL such as `http://gpu-box:11434` into host and port
    pub fn from_base_url(base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| AgentError::Config(format!("invalid Ollama base URL '{}': {}", base_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| AgentError::Config(format!("Ollama base URL '{}' has no host", base_url)))?;

        Ok(Self {
            host: format!("{}://{}", url.scheme(), host),
            port: url.port_or_known_default().unwrap_or(11434),
        })
    }
}

#[cfg(feature = "ollama")]
pub struct OllamaTransport {
    client: Ollama,
}

#[cfg(feature = "ollama")]
impl OllamaTransport {
    pub fn from_config(config: &OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
        }
    }

    pub fn from_base_url(base_url: &str) -> Result<Self> {
        Ok(Self::from_config(&OllamaConfig::from_base_url(base_url)?))
    }

    fn build_message(request: &ChatRequest) -> ChatMessage {
        let message = ChatMessage::user(request.prompt.text.clone());
        if request.prompt.images.is_empty() {
            return message;
        }

        let images = request
            .prompt
            .images
            .iter()
            .map(|image| Image::from_base64(&image.data))
            .collect();
        message.with_images(images)
    }
}

#[cfg(feature = "ollama")]
#[async_trait]
impl ChatTransport for OllamaTransport {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let chat = ChatMessageRequest::new(request.model.clone(), vec![Self::build_message(request)]);

        let response = self
            .client
            .send_chat_messages(chat)
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("ollama: {}", e)))?;

        Ok(response.message.content)
    }
}
