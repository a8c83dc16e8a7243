//! OpenAI Chat Transport
//!
//! Sends the rendered prompt as a single user message to an OpenAI-style
//! `/chat/completions` endpoint. Images ride along as `image_url` parts.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use skillbot_core::provider::{ChatRequest, ChatTransport};
use skillbot_core::{AgentError, Result};

use crate::http;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiTransport {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiTransport {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            api_key,
            base_url: base_url.into(),
        })
    }

    fn build_body(request: &ChatRequest) -> OpenAiRequest {
        let content = if request.prompt.images.is_empty() {
            OpenAiContent::Text(request.prompt.text.clone())
        } else {
            let mut parts = vec![OpenAiPart::Text {
                text: request.prompt.text.clone(),
            }];
            parts.extend(request.prompt.images.iter().map(|image| OpenAiPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_url(),
                },
            }));
            OpenAiContent::Parts(parts)
        };

        OpenAiRequest {
            model: request.model.clone(),
            messages: vec![OpenAiMessage {
                role: "user",
                content,
            }],
            reasoning_effort: request.reasoning_effort.map(|e| e.as_str()),
        }
    }

    fn extract_text(response: OpenAiResponse) -> Result<String> {
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| AgentError::Provider("openai returned no choices".into()))
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let body = Self::build_body(request);

        let response = self
            .client
            .post(http::endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error("openai", &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| http::send_error("openai", &e))?;

        if !status.is_success() {
            return Err(http::status_error("openai", status, &text));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::Provider(format!("unexpected openai response: {}", e)))?;
        Self::extract_text(parsed)
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiReplyMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiReplyMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skillbot_core::provider::{Prompt, ReasoningEffort};
    use skillbot_core::ImageData;

    fn request(prompt: Prompt) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            prompt,
            reasoning_effort: None,
            think: false,
        }
    }

    #[test]
    fn test_text_only_body() {
        let body = serde_json::to_value(OpenAiTransport::build_body(&request(Prompt::text("hi")))).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn test_image_parts_and_effort() {
        let mut req = request(Prompt {
            text: "look".into(),
            images: vec![ImageData::new("image/png", "aGk=")],
        });
        req.reasoning_effort = Some(ReasoningEffort::Low);

        let body = serde_json::to_value(OpenAiTransport::build_body(&req)).unwrap();
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGk="}}
            ])
        );
    }

    #[test]
    fn test_extract_text() {
        let response: OpenAiResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        }))
        .unwrap();
        assert_eq!(OpenAiTransport::extract_text(response).unwrap(), "hello");

        let empty: OpenAiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(OpenAiTransport::extract_text(empty).is_err());
    }
}
