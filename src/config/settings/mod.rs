
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::ChatBotError;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Lowercase spelling older deployments export, read when `API_KEY_ENV` is unset
pub const LEGACY_API_KEY_ENV: &str = "openai_api_key";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub indexed_docs: PathBuf,
    pub openai: OpenAiConfig,
    pub retrieval: RetrievalConfig,
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub server: ServerConfig,
    pub bot: BotConfig,
    pub indexing: IndexingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    /// One bot is started per key
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub batch_size: u32,
    /// Stream replies fragment by fragment instead of waiting for the full answer
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_prompt_tokens: usize,
    /// Chunks fetched from the index per question
    pub search_top_n: usize,
    /// Chunks that may end up in the prompt
    pub max_chunks: usize,
    /// Chunks scoring at or below this are dropped
    pub similarity_threshold: f32,
    /// Replaces the built-in guide text when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst_limit: usize,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub retry_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_message_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_keyfile: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_certfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BotConfig {
    /// The bot's own user id on the messaging platform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Files indexed whole, one chunk per file
    pub source_extensions: Vec<String>,
    /// Files split on the page-break delimiter
    pub markdown_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            indexed_docs: PathBuf::from("indexed_docs.json"),
            openai: OpenAiConfig::default(),
            retrieval: RetrievalConfig::default(),
            rate_limit: RateLimitConfig::default(),
            queue: QueueConfig::default(),
            server: ServerConfig::default(),
            bot: BotConfig::default(),
            indexing: IndexingConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            timeout_seconds: 30,
            retry_attempts: 3,
            batch_size: 16,
            stream: true,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_prompt_tokens: 3000,
            search_top_n: 4,
            max_chunks: 3,
            similarity_threshold: 0.5,
            guide: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_limit: 5,
            window_seconds: 60,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_interval_seconds: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7999,
            max_message_chars: 1024,
            ssl_keyfile: None,
            ssl_certfile: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            source_extensions: vec!["codon".to_string()],
            markdown_extensions: vec!["md".to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid host: {0:?} (cannot be empty)")]
    InvalidHost(String),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid API key (cannot be empty)")]
    InvalidApiKey,
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid prompt token budget: {0} (must be greater than 0)")]
    InvalidTokenBudget(usize),
    #[error("Invalid search size: {0} (must be at least 1)")]
    InvalidSearchSize(usize),
    #[error("Invalid chunk count: {0} (must be between 1 and the search size {1})")]
    InvalidChunkCount(usize, usize),
    #[error("Invalid similarity threshold: {0} (must be between -1 and 1)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid burst limit: {0} (must be greater than 0)")]
    InvalidBurstLimit(usize),
    #[error("Invalid rate limit window: {0} (must be greater than 0 seconds)")]
    InvalidRateWindow(u64),
    #[error("Invalid retry interval: {0} (must be greater than 0 seconds)")]
    InvalidRetryInterval(u64),
    #[error("Invalid message size limit: {0} (must be greater than 0)")]
    InvalidMessageLimit(usize),
    #[error("TLS needs both a key file and a certificate file")]
    IncompleteTls,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, falling back to defaults when absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Default configuration directory, `<user config dir>/docs-chat-bot`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("docs-chat-bot"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.retrieval.validate()?;
        self.rate_limit.validate()?;
        self.queue.validate()?;
        self.server.validate()?;
        Ok(())
    }

    /// Pick the API keys to run with.
    ///
    /// Keys given on the command line win over the config file. The environment is the
    /// last resort: `OPENAI_API_KEY` first, then the lowercase `openai_api_key`. Having
    /// none at all is a startup error.
    #[inline]
    pub fn resolve_api_keys(&self, cli_keys: &[String]) -> crate::Result<Vec<String>> {
        let pick = |keys: &[String]| -> Vec<String> {
            keys.iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        };

        let keys = pick(cli_keys);
        if !keys.is_empty() {
            return Ok(keys);
        }

        let keys = pick(&self.openai.api_keys);
        if !keys.is_empty() {
            return Ok(keys);
        }

        [API_KEY_ENV, LEGACY_API_KEY_ENV]
            .into_iter()
            .filter_map(|name| env::var(name).ok())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
            .map(|key| vec![key])
            .ok_or_else(|| {
                ChatBotError::Configuration(format!(
                    "Please provide the OpenAI API key with the `--api-key` option, the `openai.api_keys` config entry or the environment variable {}",
                    API_KEY_ENV
                ))
            })
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.api_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidApiKey);
        }

        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), ConfigError> {
        let url = Url::parse(base_url).map_err(|_| ConfigError::InvalidUrl(base_url.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }
        self.base_url = url.to_string();
        Ok(())
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_prompt_tokens == 0 {
            return Err(ConfigError::InvalidTokenBudget(self.max_prompt_tokens));
        }

        if self.search_top_n == 0 {
            return Err(ConfigError::InvalidSearchSize(self.search_top_n));
        }

        if self.max_chunks == 0 || self.max_chunks > self.search_top_n {
            return Err(ConfigError::InvalidChunkCount(
                self.max_chunks,
                self.search_top_n,
            ));
        }

        if !self.similarity_threshold.is_finite() || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        Ok(())
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst_limit == 0 {
            return Err(ConfigError::InvalidBurstLimit(self.burst_limit));
        }
        if self.window_seconds == 0 {
            return Err(ConfigError::InvalidRateWindow(self.window_seconds));
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_interval_seconds == 0 {
            return Err(ConfigError::InvalidRetryInterval(
                self.retry_interval_seconds,
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.max_message_chars == 0 {
            return Err(ConfigError::InvalidMessageLimit(self.max_message_chars));
        }
        if self.ssl_keyfile.is_some() != self.ssl_certfile.is_some() {
            return Err(ConfigError::IncompleteTls);
        }
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidHost(host));
        }
        self.host = host;
        Ok(())
    }
}
