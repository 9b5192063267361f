use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use propsearch_core::ranking::RankingWeights;
use propsearch_core::synonyms::SynonymTable;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chat provider used for intent parsing.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.1
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured base URL, or the provider's conventional default.
    pub fn resolved_base_url(&self) -> String {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, "ollama") => "http://localhost:11434".to_string(),
            (None, _) => "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: i64,
    #[serde(default)]
    pub weights: WeightsConfig,
    /// Extra amenity/facility synonyms: term → listing label.
    #[serde(default)]
    pub synonyms: HashMap<String, String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            weights: WeightsConfig::default(),
            synonyms: HashMap::new(),
        }
    }
}

fn default_top_k() -> i64 {
    20
}
fn default_max_top_k() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightsConfig {
    #[serde(default = "default_text_weight")]
    pub text: f64,
    #[serde(default = "default_price_weight")]
    pub price: f64,
    #[serde(default = "default_recency_weight")]
    pub recency: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            text: default_text_weight(),
            price: default_price_weight(),
            recency: default_recency_weight(),
        }
    }
}

fn default_text_weight() -> f64 {
    0.5
}
fn default_price_weight() -> f64 {
    0.3
}
fn default_recency_weight() -> f64 {
    0.2
}

impl SearchConfig {
    pub fn ranking_weights(&self) -> Result<RankingWeights> {
        RankingWeights::new(self.weights.text, self.weights.price, self.weights.recency)
    }

    pub fn synonym_table(&self) -> SynonymTable {
        SynonymTable::with_overrides(&self.synonyms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_request_timeout_secs() -> u64 {
    90
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate search
    if config.search.top_k < 1 {
        bail!("search.top_k must be >= 1");
    }
    if config.search.max_top_k < config.search.top_k {
        bail!("search.max_top_k must be >= search.top_k");
    }
    config
        .search
        .ranking_weights()
        .context("Invalid [search.weights]")?;

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.llm.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
                bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    // Validate server
    if config.server.request_timeout_secs == 0 {
        bail!("server.request_timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[db]\npath = \"./data/listings.sqlite\"\n").unwrap();
        assert!(!config.llm.is_enabled());
        assert_eq!(config.search.top_k, 20);
        assert_eq!(config.search.ranking_weights().unwrap(), RankingWeights::default());
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/x.sqlite"

            [llm]
            provider = "openai"
            base_url = "https://api.deepseek.com/v1/"
            model = "deepseek-chat"
            api_key_env = "DEEPSEEK_API_KEY"
            max_tokens = 512

            [search]
            top_k = 10
            max_top_k = 50

            [search.weights]
            text = 0.6
            price = 0.2
            recency = 0.2

            [search.synonyms]
            ev = "EV charging"

            [server]
            bind = "0.0.0.0:8080"
            request_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.resolved_base_url(), "https://api.deepseek.com/v1");
        assert_eq!(config.llm.max_tokens, Some(512));
        assert_eq!(config.search.synonym_table().expand("ev"), "EV charging");
        assert_eq!(config.search.ranking_weights().unwrap().text, 0.6);
    }

    #[test]
    fn test_default_base_urls() {
        let mut llm = LlmConfig::default();
        llm.provider = "ollama".to_string();
        assert_eq!(llm.resolved_base_url(), "http://localhost:11434");
        llm.provider = "openai".to_string();
        assert_eq!(llm.resolved_base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"anthropic\"\nmodel = \"m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_requires_model_when_enabled() {
        assert!(parse("[db]\npath = \"x\"\n[llm]\nprovider = \"ollama\"\n").is_err());
    }

    #[test]
    fn test_rejects_negative_weight() {
        assert!(parse("[db]\npath = \"x\"\n[search.weights]\ntext = -1.0\n").is_err());
    }

    #[test]
    fn test_rejects_inverted_top_k() {
        assert!(parse("[db]\npath = \"x\"\n[search]\ntop_k = 50\nmax_top_k = 10\n").is_err());
    }
}
