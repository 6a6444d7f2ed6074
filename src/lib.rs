use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatBotError>;

#[derive(Error, Debug)]
pub enum ChatBotError {
    #[error("Rate limit exceeded. You can make the next request after {:.2} seconds.", retry_after.as_secs_f64())]
    RateLimitExceeded { retry_after: Duration },

    #[error("Prompt too long")]
    PromptTooLarge,

    #[error("Upstream rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("No bot available to answer")]
    NoCapacity,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ChatBotError {
    /// Short stable code used in logs and in the generic fallback reply
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::PromptTooLarge => "prompt_too_large",
            Self::UpstreamRejected(_) => "upstream_rejected",
            Self::Upstream(_) => "upstream_error",
            Self::NoCapacity => "no_capacity",
            Self::Configuration(_) => "configuration",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Io(_) => "io",
            Self::Other(_) => "internal",
        }
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod indexer;
pub mod messaging;
pub mod prompt;
pub mod server;

#[cfg(test)]
mod test_support;
