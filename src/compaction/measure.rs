//! Precise token measurement collaborators.
//!
//! The counter treats these as optional and unreliable: any error or timeout sends it
//! down the offline estimator path instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Exact token counting service.
#[async_trait]
pub trait PreciseCounter: Send + Sync {
    async fn count_tokens(&self, text: &str) -> Result<usize>;
}

const ANTHROPIC_COUNT_TOKENS_URL: &str = "https://api.anthropic.com/v1/messages/count_tokens";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Counts tokens through the Anthropic `count_tokens` endpoint.
///
/// The API key is passed in by the caller; this type never inspects the environment.
pub struct AnthropicTokenCounter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}

impl AnthropicTokenCounter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: ANTHROPIC_COUNT_TOKENS_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (proxies, test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": text }],
        })
    }
}

#[async_trait]
impl PreciseCounter for AnthropicTokenCounter {
    async fn count_tokens(&self, text: &str) -> Result<usize> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(text))
            .send()
            .await
            .context("count_tokens request failed")?
            .error_for_status()
            .context("count_tokens returned an error status")?;

        let parsed: CountTokensResponse = response
            .json()
            .await
            .context("Failed to parse count_tokens response")?;

        Ok(parsed.input_tokens)
    }
}
