//! Chat provider trait definition.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use propsearch_core::chunk::Chunk;

use crate::config::LlmConfig;

/// Options applied to every request a provider makes.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Temperature for sampling (0.0 = deterministic).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Request timeout. For streaming calls this bounds connection setup
    /// and the whole body.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
        }
    }
}

/// Errors that can occur when talking to a chat provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider reported an error mid-stream: {0}")]
    Provider(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,
}

impl LlmError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Connection(e.to_string())
        }
    }
}

/// Normalized chunks of one streaming completion.
///
/// Malformed frames are logged and skipped by the provider; an `Err` item
/// means the stream itself failed and no further items follow.
pub type ChunkStream = BoxStream<'static, Result<Chunk, LlmError>>;

/// A chat-completion backend.
///
/// Implementations hold no per-request mutable state and are shared across
/// request tasks behind an `Arc`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g. "openai", "ollama").
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// One-shot completion returning the full answer text.
    ///
    /// With `json_mode`, the provider is asked for a JSON object response
    /// where the backend supports it.
    async fn complete(&self, system: &str, user: &str, json_mode: bool) -> Result<String, LlmError>;

    /// Streaming completion yielding reasoning and answer increments.
    async fn complete_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<(), LlmError>;
}
