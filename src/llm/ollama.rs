//! Ollama chat provider (`/api/chat`, newline-delimited JSON streaming).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use propsearch_core::chunk::ChunkFormat;

use super::provider::{ChatProvider, ChunkStream, CompletionOptions, LlmError};
use super::stream::decode_chunks;

/// Connects to an Ollama server. Thinking models stream their reasoning in
/// `message.thinking`, which is forwarded separately from the answer.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    options: CompletionOptions,
}

impl OllamaProvider {
    /// # Arguments
    /// * `base_url` - Base URL of the Ollama server (e.g., "http://localhost:11434").
    /// * `model` - Model to use (e.g., "qwen3:8b").
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            options,
        }
    }

    fn request(
        &self,
        system: &str,
        user: &str,
        stream: bool,
        json_mode: bool,
    ) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream,
            format: json_mode.then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: Some(self.options.temperature),
                num_predict: self.options.max_tokens.map(|n| n as i32),
            },
        }
    }

    async fn send(&self, request: &OllamaChatRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
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
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
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
        debug!(model = %self.model, json_mode, "Sending completion request to Ollama");

        let response = self.send(&request).await?;
        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse Ollama response: {}", e))
        })?;
        Ok(parsed.message.content)
    }

    async fn complete_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError> {
        let request = self.request(system, user, true, false);
        debug!(model = %self.model, "Opening streaming completion to Ollama");
        let response = self.send(&request).await?;
        Ok(decode_chunks(response.bytes_stream(), ChunkFormat::Ollama))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;
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
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}
