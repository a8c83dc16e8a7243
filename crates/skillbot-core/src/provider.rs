//! LLM Provider Adapters
//!
//! The orchestrator talks to providers only through [`LlmAdapter`]. The
//! stock implementation, [`ProviderAdapter`], wraps a provider-specific
//! [`ChatTransport`] (OpenAI chat, Anthropic messages, Ollama, or a test
//! stub) and adds the model/reasoning settings plus in-flight cancellation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skillbot_core::provider::{ProviderAdapter, SendOptions};
//!
//! let adapter = ProviderAdapter::new(Arc::new(transport), "gpt-4o-mini");
//! let reply = adapter.send_message(prompt, &SendOptions::default()).await?;
//! ```

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::message::ImageData;

/// How hard a reasoning model should think
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(AgentError::Config(format!(
                "invalid reasoning effort '{}' (expected minimal, low, medium or high)",
                other
            ))),
        }
    }
}

/// Per-send overrides
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendOptions {
    /// Model override, e.g. from the active skill
    #[serde(default)]
    pub model: Option<String>,

    /// How many recent turns to render into the prompt
    #[serde(default)]
    pub memory_limit: Option<usize>,

    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Ask thinking-capable models to think before answering
    #[serde(default)]
    pub think: Option<bool>,
}

/// A rendered prompt ready to send
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,

    /// Images from the rendered turns, oldest first
    pub images: Vec<ImageData>,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Fully resolved request handed to a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: Prompt,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub think: bool,
}

/// Provider-specific wire call. Implementations only need to perform one
/// request; cancellation is handled by dropping the returned future.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Provider name for logging (e.g. "openai")
    fn name(&self) -> &str;

    /// Send one request and return the reply text
    async fn send(&self, request: &ChatRequest) -> Result<String>;
}

/// What the orchestrator needs from a provider
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Send a prompt. A send superseded by a newer one, or cancelled through
    /// [`LlmAdapter::cancel`], resolves to `Ok(String::new())`.
    async fn send_message(&self, prompt: Prompt, options: &SendOptions) -> Result<String>;

    fn set_model(&self, model: &str);

    fn set_reasoning_effort(&self, effort: Option<ReasoningEffort>);

    /// Abort the request in flight, if any
    fn cancel(&self);
}

#[derive(Clone, Debug)]
struct AdapterSettings {
    model: String,
    reasoning_effort: Option<ReasoningEffort>,
}

/// [`LlmAdapter`] over an injected transport, allowing at most one request
/// in flight: starting a send cancels the previous one.
pub struct ProviderAdapter {
    transport: Arc<dyn ChatTransport>,
    settings: Mutex<AdapterSettings>,
    in_flight: Mutex<Option<InFlight>>,
    next_request: AtomicU64,
}

struct InFlight {
    id: u64,
    token: CancellationToken,
}

impl ProviderAdapter {
    pub fn new(transport: Arc<dyn ChatTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            settings: Mutex::new(AdapterSettings {
                model: model.into(),
                reasoning_effort: None,
            }),
            in_flight: Mutex::new(None),
            next_request: AtomicU64::new(0),
        }
    }

    pub fn with_reasoning_effort(self, effort: Option<ReasoningEffort>) -> Self {
        self.set_reasoning_effort(effort);
        self
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn model(&self) -> String {
        self.settings().model.clone()
    }

    pub fn reasoning_effort(&self) -> Option<ReasoningEffort> {
        self.settings().reasoning_effort
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, AdapterSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new in-flight request, cancelling whichever was there
    fn begin(&self) -> (u64, CancellationToken) {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = slot.replace(InFlight {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(provider = %self.transport.name(), "Superseding in-flight request");
            previous.token.cancel();
        }
        (id, token)
    }

    /// Clear the slot if it still belongs to request `id`
    fn finish(&self, id: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }

    fn resolve(&self, prompt: Prompt, options: &SendOptions) -> ChatRequest {
        let settings = self.settings();
        ChatRequest {
            model: options.model.clone().unwrap_or_else(|| settings.model.clone()),
            prompt,
            reasoning_effort: options.reasoning_effort.or(settings.reasoning_effort),
            think: options.think.unwrap_or(false),
        }
    }
}

#[async_trait]
impl LlmAdapter for ProviderAdapter {
    async fn send_message(&self, prompt: Prompt, options: &SendOptions) -> Result<String> {
        let request = self.resolve(prompt, options);
        let (id, token) = self.begin();

        tracing::debug!(
            provider = %self.transport.name(),
            model = %request.model,
            images = request.prompt.images.len(),
            "Sending prompt"
        );

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.transport.send(&request) => Some(result),
        };

        self.finish(id);

        match outcome {
            Some(result) => result,
            None => {
                tracing::debug!(provider = %self.transport.name(), "Request cancelled");
                Ok(String::new())
            }
        }
    }

    fn set_model(&self, model: &str) {
        self.settings().model = model.to_string();
    }

    fn set_reasoning_effort(&self, effort: Option<ReasoningEffort>) {
        self.settings().reasoning_effort = effort;
    }

    fn cancel(&self) {
        let slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(in_flight) = slot {
            in_flight.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Echoes the prompt back; a prompt of "slow" never finishes in test time
    struct EchoTransport {
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl EchoTransport {
        fn new() -> Self {
            Self { seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatTransport for EchoTransport {
        fn name(&self) -> &str {
            "echo"
        }

        async fn send(&self, request: &ChatRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            if request.prompt.text == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(format!("echo: {}", request.prompt.text))
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl ChatTransport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _request: &ChatRequest) -> Result<String> {
            Err(AgentError::ProviderUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_model_override_and_settings() {
        let transport = Arc::new(EchoTransport::new());
        let adapter = ProviderAdapter::new(transport.clone(), "base-model")
            .with_reasoning_effort(Some(ReasoningEffort::Low));

        let reply = adapter
            .send_message(Prompt::text("hi"), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "echo: hi");

        adapter.set_model("other-model");
        let options = SendOptions {
            model: Some("skill-model".into()),
            think: Some(true),
            ..Default::default()
        };
        adapter.send_message(Prompt::text("again"), &options).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].model, "base-model");
        assert_eq!(seen[0].reasoning_effort, Some(ReasoningEffort::Low));
        assert!(!seen[0].think);
        assert_eq!(seen[1].model, "skill-model");
        assert!(seen[1].think);
        assert_eq!(adapter.model(), "other-model");
    }

    #[tokio::test]
    async fn test_new_send_supersedes_in_flight() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(EchoTransport::new()), "m"));

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .send_message(Prompt::text("slow"), &SendOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = adapter
            .send_message(Prompt::text("fast"), &SendOptions::default())
            .await
            .unwrap();

        assert_eq!(second, "echo: fast");
        assert_eq!(first.await.unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn test_cancel_yields_empty_reply() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(EchoTransport::new()), "m"));

        let pending = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .send_message(Prompt::text("slow"), &SendOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        adapter.cancel();

        assert_eq!(pending.await.unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let adapter = ProviderAdapter::new(Arc::new(FailingTransport), "m");
        let err = adapter
            .send_message(Prompt::text("hi"), &SendOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_reasoning_effort_parse() {
        assert_eq!("HIGH".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::High);
        assert_eq!(" low ".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::Low);
        assert!("extreme".parse::<ReasoningEffort>().is_err());
    }
}
