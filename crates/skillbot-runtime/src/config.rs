//! Adapter Configuration
//!
//! Environment-driven provider selection:
//!
//! | Variable               | Required                  | Default             |
//! |------------------------|---------------------------|---------------------|
//! | `LLM_ADAPTER`          | yes                       |                     |
//! | `LLM_API_KEY`          | for openai and anthropic  |                     |
//! | `LLM_BASE_URL`         | no                        | per provider        |
//! | `LLM_MODEL`            | no                        | per provider        |
//! | `LLM_MEMORY_LIMIT`     | no                        | 10                  |
//! | `LLM_REASONING_EFFORT` | no                        | unset               |

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use skillbot_core::message::DEFAULT_MEMORY_LIMIT;
use skillbot_core::{AgentError, ReasoningEffort, Result};

use crate::{anthropic, ollama, openai};

/// Supported provider families
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterKind {
    OpenAi,
    Anthropic,
    Ollama,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 3] = [AdapterKind::OpenAi, AdapterKind::Anthropic, AdapterKind::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::OpenAi => "openai",
            AdapterKind::Anthropic => "anthropic",
            AdapterKind::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            AdapterKind::OpenAi => openai::DEFAULT_BASE_URL,
            AdapterKind::Anthropic => anthropic::DEFAULT_BASE_URL,
            AdapterKind::Ollama => ollama::DEFAULT_BASE_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AdapterKind::OpenAi => openai::DEFAULT_MODEL,
            AdapterKind::Anthropic => anthropic::DEFAULT_MODEL,
            AdapterKind::Ollama => ollama::DEFAULT_MODEL,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, AdapterKind::Ollama)
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(AdapterKind::as_str).collect();
                AgentError::Config(format!(
                    "invalid LLM_ADAPTER value: '{}' (expected one of: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Resolved provider settings
#[derive(Debug)]
pub struct AdapterConfig {
    pub kind: AdapterKind,

    pub api_key: Option<SecretString>,

    pub base_url: String,

    pub model: String,

    /// Turns rendered into each prompt
    pub memory_limit: usize,

    pub reasoning_effort: Option<ReasoningEffort>,
}

impl AdapterConfig {
    /// Defaults for `kind`, without an API key
    pub fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: kind.default_base_url().into(),
            model: kind.default_model().into(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            reasoning_effort: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kind: AdapterKind = get("LLM_ADAPTER")
            .ok_or_else(|| AgentError::Config("missing required environment variable: LLM_ADAPTER".into()))?
            .parse()?;

        let mut config = Self::new(kind);

        if let Some(key) = get("LLM_API_KEY") {
            config = config.with_api_key(key);
        } else if kind.requires_api_key() {
            return Err(AgentError::Config(format!(
                "missing required environment variable: LLM_API_KEY (needed for {})",
                kind
            )));
        }

        if let Some(url) = get("LLM_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = get("LLM_MODEL") {
            config.model = model;
        }
        if let Some(limit) = get("LLM_MEMORY_LIMIT") {
            config.memory_limit = limit.parse().map_err(|_| {
                AgentError::Config(format!("invalid LLM_MEMORY_LIMIT value: '{}'", limit))
            })?;
        }
        if let Some(effort) = get("LLM_REASONING_EFFORT") {
            config.reasoning_effort = Some(effort.parse()?);
        }

        tracing::debug!(
            adapter = %config.kind,
            model = %config.model,
            base_url = %config.base_url,
            memory_limit = config.memory_limit,
            "Loaded adapter config"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AdapterConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AdapterConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_adapter_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("LLM_ADAPTER"));
    }

    #[test]
    fn test_adapter_name_case_insensitive() {
        let config = load(&[("LLM_ADAPTER", "Ollama")]).unwrap();
        assert_eq!(config.kind, AdapterKind::Ollama);
        assert_eq!(config.model, ollama::DEFAULT_MODEL);
        assert_eq!(config.memory_limit, 10);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_adapter_named_in_error() {
        let err = load(&[("LLM_ADAPTER", "gemini")]).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert!(err.to_string().contains("'gemini'"));
    }

    #[test]
    fn test_api_key_required_for_hosted() {
        let err = load(&[("LLM_ADAPTER", "openai")]).unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));

        let config = load(&[("LLM_ADAPTER", "OPENAI"), ("LLM_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.api_key.as_ref().unwrap().expose_secret(), "sk-test");
        assert_eq!(config.base_url, openai::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("LLM_ADAPTER", "anthropic"),
            ("LLM_API_KEY", "key"),
            ("LLM_BASE_URL", "http://proxy.local"),
            ("LLM_MODEL", "claude-test"),
            ("LLM_MEMORY_LIMIT", "4"),
            ("LLM_REASONING_EFFORT", "HIGH"),
        ])
        .unwrap();

        assert_eq!(config.base_url, "http://proxy.local");
        assert_eq!(config.model, "claude-test");
        assert_eq!(config.memory_limit, 4);
        assert_eq!(config.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn test_bad_numbers_and_efforts() {
        assert!(load(&[("LLM_ADAPTER", "ollama"), ("LLM_MEMORY_LIMIT", "lots")]).is_err());
        assert!(load(&[("LLM_ADAPTER", "ollama"), ("LLM_REASONING_EFFORT", "extreme")]).is_err());
    }

    #[test]
    fn test_api_key_not_in_debug() {
        let config = load(&[("LLM_ADAPTER", "openai"), ("LLM_API_KEY", "sk-secret")]).unwrap();
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
