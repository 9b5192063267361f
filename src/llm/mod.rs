//! Chat provider abstraction layer.
//!
//! Intent parsing talks to a [`ChatProvider`]; concrete backends are the
//! OpenAI-compatible chat completions API and Ollama's native API. Both
//! normalize their streams into [`propsearch_core::chunk::Chunk`]s.

mod ollama;
mod openai;
mod provider;
mod stream;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatProvider, ChunkStream, CompletionOptions, LlmError};
pub use stream::decode_chunks;

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LlmConfig;

/// Build the configured provider, or `None` when intent parsing is disabled.
pub fn create_provider(config: &LlmConfig) -> Result<Option<Arc<dyn ChatProvider>>> {
    if !config.is_enabled() {
        info!("Chat provider disabled; queries will use keyword search only");
        return Ok(None);
    }

    let model = match config.model.as_deref() {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => bail!("llm.model must be specified when provider is '{}'", config.provider),
    };
    let base_url = config.resolved_base_url();
    let options = CompletionOptions::from(config);

    let provider: Arc<dyn ChatProvider> = match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty());
            if api_key.is_none() {
                warn!(
                    env = %config.api_key_env,
                    "No API key found in environment; sending unauthenticated requests"
                );
            }
            Arc::new(OpenAiProvider::new(base_url.clone(), model, api_key, options))
        }
        "ollama" => Arc::new(OllamaProvider::new(base_url.clone(), model, options)),
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    };

    info!(
        provider = provider.name(),
        model = provider.model(),
        base_url = %base_url,
        "Chat provider configured"
    );
    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_yields_none() {
        assert!(create_provider(&LlmConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_builds_ollama() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: Some("qwen3:8b".to_string()),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "qwen3:8b");
    }

    #[test]
    fn test_requires_model() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
