//! LLM collaborator — single-shot text generation.
//!
//! The pipeline uses this for exactly one thing: classifying messages the
//! deterministic router couldn't. One bounded prompt, one completion, no
//! streaming, no multi-turn state. The HTTP client targets the Anthropic
//! messages API (non-streaming).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// One completion call is all classification gets.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(20);

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A single-shot generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Completion text plus usage.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Single-shot LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError>;
}

// ── HTTP implementation ─────────────────────────────────────────────

/// Non-streaming messages-API client.
pub struct HttpLlm {
    api_url: String,
    api_key: SecretString,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: UsageBlock,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl HttpLlm {
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            payload["system"] = serde_json::Value::String(system.clone());
        }

        let resp = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| LlmError::InvalidResponse("empty content".into()))?;

        debug!(
            model = %self.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "LLM completion"
        );

        Ok(GenerateResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
            },
        })
    }
}
