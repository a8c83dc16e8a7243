//! Anthropic Messages Transport

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use skillbot_core::provider::{ChatRequest, ChatTransport};
use skillbot_core::{AgentError, Result};

use crate::http;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Thinking budget used when a send asks the model to think
const THINKING_BUDGET: u32 = 2048;

pub struct AnthropicTransport {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl AnthropicTransport {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            api_key,
            base_url: base_url.into(),
        })
    }

    fn build_body(request: &ChatRequest) -> AnthropicRequest {
        let mut content: Vec<AnthropicBlock> = request
            .prompt
            .images
            .iter()
            .map(|image| AnthropicBlock::Image {
                source: ImageSource {
                    r#type: "base64".into(),
                    media_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            })
            .collect();
        content.push(AnthropicBlock::Text {
            text: request.prompt.text.clone(),
        });

        let thinking = request.think.then_some(Thinking {
            r#type: "enabled",
            budget_tokens: THINKING_BUDGET,
        });

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: if thinking.is_some() {
                MAX_TOKENS + THINKING_BUDGET
            } else {
                MAX_TOKENS
            },
            messages: vec![AnthropicMessage {
                role: "user",
                content,
            }],
            thinking,
        }
    }

    /// Concatenate the text blocks; thinking blocks are dropped
    fn extract_text(response: AnthropicResponse) -> String {
        response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl ChatTransport for AnthropicTransport {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let body = Self::build_body(request);

        let response = self
            .client
            .post(http::endpoint(&self.base_url, "v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error("anthropic", &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| http::send_error("anthropic", &e))?;

        if !status.is_success() {
            return Err(http::status_error("anthropic", status, &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::Provider(format!("unexpected anthropic response: {}", e)))?;
        Ok(Self::extract_text(parsed))
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct Thinking {
    r#type: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    Image { source: ImageSource },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageSource {
    r#type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skillbot_core::provider::Prompt;
    use skillbot_core::ImageData;

    fn request(prompt: Prompt, think: bool) -> ChatRequest {
        ChatRequest {
            model: DEFAULT_MODEL.into(),
            prompt,
            reasoning_effort: None,
            think,
        }
    }

    #[test]
    fn test_body_puts_images_first() {
        let prompt = Prompt {
            text: "what is this?".into(),
            images: vec![ImageData::new("image/jpeg", "AAAA")],
        };
        let body = serde_json::to_value(AnthropicTransport::build_body(&request(prompt, false))).unwrap();

        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("thinking").is_none());
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "AAAA"}},
                {"type": "text", "text": "what is this?"}
            ])
        );
    }

    #[test]
    fn test_thinking_budget() {
        let body = serde_json::to_value(AnthropicTransport::build_body(&request(Prompt::text("hm"), true))).unwrap();
        assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 2048}));
        assert_eq!(body["max_tokens"], 4096 + 2048);
    }

    #[test]
    fn test_extract_text_skips_thinking() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "let me see", "signature": "x"},
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();

        assert_eq!(AnthropicTransport::extract_text(response), "Hello there");
    }
}
