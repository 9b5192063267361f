//! OpenAI-compatible chat provider.
//!
//! Works with OpenAI and any service implementing the chat completions API
//! (DeepSeek, DashScope, SiliconFlow, Moonshot, vLLM, ...). The stream
//! adapter is chosen once from the base URL, so reasoning models that emit
//! `delta.reasoning_content` get their reasoning forwarded separately.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use propsearch_core::chunk::ChunkFormat;

use super::provider::{ChatProvider, ChunkStream, CompletionOptions, LlmError};
use super::stream::decode_chunks;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    options: CompletionOptions,
    format: ChunkFormat,
}

impl OpenAiProvider {
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "https://api.openai.com/v1").
    /// * `model` - Model to use (e.g., "gpt-4o-mini", "deepseek-chat").
    /// * `api_key` - Optional bearer token.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        options: CompletionOptions,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let format = match ChunkFormat::for_endpoint(&base_url) {
            // Ollama's OpenAI-compatible endpoint still speaks SSE.
            ChunkFormat::Ollama => ChunkFormat::OpenAi,
            other => other,
        };
        Self {
            client: Client::new(),
            base_url,
            model: model.into(),
            api_key,
            options,
            format,
        }
    }

    pub fn chunk_format(&self) -> ChunkFormat {
        self.format
    }

    fn request(&self, system: &str, user: &str, stream: bool, json_mode: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.options.temperature),
            max_tokens: self.options.max_tokens,
            stream,
            response_format: json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.options.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let request = self.request(system, user, false, json_mode);
        debug!(
            model = %self.model,
            json_mode,
            "Sending completion request to OpenAI-compatible API"
        );

        let response = self.send(&request).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse chat response: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            LlmError::InvalidResponse("No choices in chat response".to_string())
        })?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn complete_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError> {
        let request = self.request(system, user, true, false);
        debug!(
            model = %self.model,
            format = self.format.name(),
            "Opening streaming completion"
        );
        let response = self.send(&request).await?;
        Ok(decode_chunks(response.bytes_stream(), self.format))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url).timeout(self.options.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(LlmError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(LlmError::Api {
                status: response.status().as_u16(),
                message: "health check failed".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
