//! Model provider adapters.
//!
//! A provider descriptor is a LiteLLM-style string: `vendor/model-name`
//! (e.g. `openrouter/mistralai/mistral-7b-instruct`). The shipped adapter
//! speaks the OpenAI-compatible chat-completions protocol, which covers
//! OpenRouter, OpenAI, and most self-hosted gateways. Anything that fails -
//! network, auth, quota, malformed body - surfaces as a [`ProviderError`]
//! and triggers rotation in the router.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Parse(String),
}

/// One model call's worth of request parameters.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A successful completion with usage accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Cost reported by the provider, when it reports one.
    pub cost_usd: Option<f64>,
}

/// A single (provider, model) endpoint the router can rotate onto.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Vendor segment of the descriptor (used in ledger rows).
    fn provider(&self) -> &str;

    /// Full descriptor string (used in ledger rows and cost lookup).
    fn model(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError>;
}

/// OpenAI-compatible chat-completions adapter.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    provider: String,
    descriptor: String,
    model: String,
}

impl OpenAiChat {
    /// Build an adapter from a `vendor/model` descriptor, resolving the
    /// endpoint and credential from the vendor segment. A missing API key
    /// puts the adapter in stub mode: calls succeed with a deterministic
    /// placeholder and zero usage, so the pipeline stays runnable offline.
    pub fn from_descriptor(descriptor: &str) -> Self {
        let (provider, model) = match descriptor.split_once('/') {
            Some((vendor, rest)) => (vendor.to_string(), rest.to_string()),
            None => ("openai".to_string(), descriptor.to_string()),
        };

        let (base_url, key_var) = match provider.as_str() {
            "openrouter" => ("https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
            "openai" => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
            _ => ("https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
        };

        let api_key = std::env::var(key_var).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            debug!(
                "{} not set - provider {} runs in stub mode",
                key_var, descriptor
            );
        }

        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key,
            provider,
            descriptor: descriptor.to_string(),
            model,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.descriptor
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Ok(Completion {
                text: format!("[stub: {} - no API key configured]", self.descriptor),
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: Some(0.0),
            });
        };

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::Auth(body),
                429 => ProviderError::RateLimit(body),
                code => ProviderError::Api { status: code, body },
            });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Parse(err.to_string()))?;

        let text = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ProviderError::Parse("response carried no choices".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            cost_usd: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_split() {
        let adapter = OpenAiChat::from_descriptor("openrouter/mistralai/mistral-7b-instruct");
        assert_eq!(adapter.provider(), "openrouter");
        assert_eq!(adapter.model(), "openrouter/mistralai/mistral-7b-instruct");
        assert_eq!(adapter.model, "mistralai/mistral-7b-instruct");
    }

    #[test]
    fn test_bare_descriptor_defaults_to_openai() {
        let adapter = OpenAiChat::from_descriptor("gpt-4o-mini");
        assert_eq!(adapter.provider(), "openai");
        assert_eq!(adapter.base_url, "https://api.openai.com/v1");
    }
}
