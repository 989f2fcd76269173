// Copyright (c) 2024-2026, Daily
//
// SPDX-License-Identifier: BSD 2-Clause License

//! Groq LLM adapter.
//!
//! Posts non-streaming OpenAI-compatible chat completions to the Groq API.
//! Reply generation uses conversational sampling (temperature 0.4, 150
//! tokens); the auxiliary [`classify`](crate::services::LlmService::classify)
//! path used by the completeness gate runs near-deterministic (temperature
//! 0.1, 60 tokens).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{ChatMessage, LlmService, ServiceError};

// ---------------------------------------------------------------------------
// OpenAI-compatible request / response types (non-streaming subset)
// ---------------------------------------------------------------------------

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

/// Non-streaming completions response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// GroqLlmService
// ---------------------------------------------------------------------------

/// Groq chat-completion adapter.
pub struct GroqLlmService {
    api_key: String,
    /// Model identifier; empty input selects the default.
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    client: reqwest::Client,
}

impl GroqLlmService {
    const DEFAULT_BASE_URL: &'static str = "https://api.groq.com/openai/v1";
    const DEFAULT_MODEL: &'static str = "llama-3.1-8b-instant";

    /// Create an adapter; an empty model string selects the default model.
    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        let model = if model.is_empty() {
            Self::DEFAULT_MODEL.to_string()
        } else {
            model.to_string()
        };
        Self {
            api_key: api_key.into(),
            model,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            temperature: Some(0.4),
            max_tokens: Some(150),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
        }
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builder method: set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Builder method: set the completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Run one non-streaming completion with explicit sampling parameters.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f64>,
        max_tokens: Option<u64>,
    ) -> Result<String, ServiceError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        debug!(
            "groq: requesting completion ({} messages, model {})",
            messages.len(),
            self.model,
        );

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ServiceError::Api {
                service: "groq",
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::InvalidResponse {
                service: "groq",
                detail: e.to_string(),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ServiceError::InvalidResponse {
                service: "groq",
                detail: "response carried no message content".to_string(),
            })
    }
}

#[async_trait]
impl LlmService for GroqLlmService {
    async fn reply(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        self.complete(messages, self.temperature, self.max_tokens)
            .await
    }

    async fn classify(&self, prompt: &str) -> Result<String, ServiceError> {
        self.complete(&[ChatMessage::user(prompt)], Some(0.1), Some(60))
            .await
    }
}

impl std::fmt::Debug for GroqLlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqLlmService")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
