// Configuration management module
// TOML settings, API key resolution and the `config --show` report

pub mod settings;


use std::path::{Path, PathBuf};

use console::style;

pub use settings::{
    BotConfig, Config, ConfigError, IndexingConfig, OpenAiConfig, QueueConfig, RateLimitConfig,
    RetrievalConfig, ServerConfig,
};

/// Get the configuration directory path, honouring an explicit override
#[inline]
pub fn get_config_dir(override_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::config_dir(),
    }
}

/// Hide all but the last four characters of an API key
#[inline]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
    eprintln!("  Chat Model: {}", style(&config.openai.chat_model).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.openai.embedding_model).cyan()
    );
    if config.openai.api_keys.is_empty() {
        eprintln!("  API Keys: {}", style("none (falls back to environment)").dim());
    } else {
        for key in &config.openai.api_keys {
            eprintln!("  API Key: {}", style(mask_key(key)).cyan());
        }
    }
    eprintln!("  Streaming: {}", style(config.openai.stream).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Max Prompt Tokens: {}",
        style(config.retrieval.max_prompt_tokens).cyan()
    );
    eprintln!(
        "  Chunks: {} of top {} above {}",
        style(config.retrieval.max_chunks).cyan(),
        style(config.retrieval.search_top_n).cyan(),
        style(config.retrieval.similarity_threshold).cyan()
    );
    eprintln!(
        "  Rate Limit: {} per {}s",
        style(config.rate_limit.burst_limit).cyan(),
        style(config.rate_limit.window_seconds).cyan()
    );
    eprintln!(
        "  Queue Retry: every {}s",
        style(config.queue.retry_interval_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Server:").bold().yellow());
    eprintln!(
        "  Listen: {}",
        style(format!("{}:{}", config.server.host, config.server.port)).cyan()
    );
    match (&config.server.ssl_keyfile, &config.server.ssl_certfile) {
        (Some(key), Some(cert)) => eprintln!(
            "  TLS: {} / {}",
            style(key.display()).cyan(),
            style(cert.display()).cyan()
        ),
        _ => eprintln!("  TLS: {}", style("disabled").dim()),
    }

    eprintln!();
    eprintln!(
        "Index file: {}",
        style(config.base_dir.join(&config.indexed_docs).display()).dim()
    );
    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
}
