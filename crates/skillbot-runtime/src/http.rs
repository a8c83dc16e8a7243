//! Shared HTTP plumbing for the hosted providers

use std::time::Duration;

use reqwest::{Client, StatusCode};
use skillbot_core::AgentError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) fn client() -> Result<Client, AgentError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to create HTTP client: {}", e)))
}

/// Map a non-success response onto the error taxonomy
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> AgentError {
    let message = format!("{} returned {}: {}", provider, status, body.trim());
    match status.as_u16() {
        401 | 403 => AgentError::Auth(message),
        429 => AgentError::RateLimited(message),
        500..=599 => AgentError::ProviderUnavailable(message),
        _ => AgentError::Provider(message),
    }
}

pub(crate) fn send_error(provider: &str, err: &reqwest::Error) -> AgentError {
    if err.is_timeout() || err.is_connect() {
        AgentError::ProviderUnavailable(format!("{}: {}", provider, err))
    } else {
        AgentError::Provider(format!("{} request failed: {}", provider, err))
    }
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("openai", StatusCode::UNAUTHORIZED, ""),
            AgentError::Auth(_)
        ));
        assert!(matches!(
            status_error("openai", StatusCode::TOO_MANY_REQUESTS, ""),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            status_error("openai", StatusCode::BAD_GATEWAY, ""),
            AgentError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            status_error("openai", StatusCode::BAD_REQUEST, "bad model"),
            AgentError::Provider(msg) if msg.contains("bad model")
        ));
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
