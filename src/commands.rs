use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::chat::{Bot, BotPool, ChatService, OpenAiChatClient};
use crate::config::{Config, get_config_dir, show_config};
use crate::embeddings::{EmbeddingClient, EmbeddingIndex};
use crate::indexer::Indexer;
use crate::messaging::{Developer, JsonLinesSink, MessageRouter, MessageSink, serve_lines};
use crate::prompt::{PromptBuilder, TokenCounter};
use crate::{ChatBotError, Result, server};

/// Load the configuration from `config_dir`, or the default directory
#[inline]
pub fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let dir = get_config_dir(config_dir).map_err(|e| ChatBotError::Configuration(e.to_string()))?;
    Ok(Config::load(dir)?)
}

/// Print the effective configuration, or write the defaults when no file exists yet
#[inline]
pub fn config_command(config: &Config, show: bool) -> Result<()> {
    if show {
        show_config(config);
        return Ok(());
    }

    let path = config.config_file_path();
    if path.exists() {
        eprintln!(
            "{} {}",
            style("Config file already exists:").yellow(),
            path.display()
        );
    } else {
        config.save()?;
        eprintln!("{} {}", style("✅ Wrote").green(), path.display());
    }
    Ok(())
}

/// Load the index and start one bot per API key
pub fn build_service(config: &Config, api_keys: &[String]) -> Result<ChatService> {
    let Some(first_key) = api_keys.first() else {
        return Err(ChatBotError::Configuration("no API key".to_string()));
    };

    let index = EmbeddingIndex::load(&config.indexed_docs)?;
    if index.is_empty() {
        warn!("Index {} holds no chunks", config.indexed_docs.display());
    }

    let counter = TokenCounter::for_model(&config.openai.chat_model)?;
    let bots = api_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let client = OpenAiChatClient::new(&config.openai, key.as_str());
            Arc::new(Bot::new(format!("bot-{}", i + 1), Arc::new(client)))
        })
        .collect::<Vec<_>>();
    info!("Started {} bots on {}", bots.len(), config.openai.chat_model);

    Ok(ChatService::new(
        BotPool::new(bots),
        Arc::new(EmbeddingClient::new(&config.openai, first_key.as_str())),
        Arc::new(index),
        PromptBuilder::new(counter, &config.retrieval),
        config,
    ))
}

/// Shutdown channel flipped to `true` on SIGINT or SIGTERM
pub fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        eprintln!("\n📴 Received interrupt signal, shutting down...");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Answer `POST /chat` until interrupted
pub async fn serve_http(config: Config, api_keys: &[String]) -> Result<()> {
    let service = Arc::new(build_service(&config, api_keys)?);
    let shutdown = shutdown_on_signal();

    eprintln!(
        "🌐 Serving {} on {}:{}",
        style("/chat").cyan(),
        config.server.host,
        config.server.port
    );
    let result = server::serve(&config.server, Arc::clone(&service), shutdown).await;

    service.close().await;
    eprintln!("✅ Shutdown complete");
    Ok(result?)
}

/// Answer messaging events from stdin, writing replies to stdout, until EOF or interrupt
pub async fn run_bot(config: Config, api_keys: &[String]) -> Result<()> {
    let client_id = config.bot.client_id.clone().ok_or_else(|| {
        ChatBotError::Configuration(
            "bot mode needs the bot's client id (`--client-id` or `bot.client_id`)".to_string(),
        )
    })?;
    let developer = match (
        &config.bot.developer_conversation_id,
        &config.bot.developer_user_id,
    ) {
        (Some(conversation_id), Some(user_id)) => Some(Developer {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
        }),
        _ => None,
    };

    let service = Arc::new(build_service(&config, api_keys)?);
    let sink: Arc<dyn MessageSink> = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
    let router = Arc::new(MessageRouter::new(
        Arc::clone(&service),
        Arc::clone(&sink),
        client_id,
        developer,
    ));
    let shutdown = shutdown_on_signal();

    let retry_loop = tokio::spawn(
        Arc::clone(&service).run_retry_loop(Arc::clone(&sink), shutdown.clone()),
    );

    let result = serve_lines(BufReader::new(tokio::io::stdin()), router, shutdown).await;

    retry_loop.abort();
    match retry_loop.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("Retry loop failed: {}", e),
    }
    let pending = service.queue().len().await;
    if pending > 0 {
        warn!("{} queued questions were not answered", pending);
    }

    service.close().await;
    Ok(result?)
}

/// Index `dir` into `output`
pub async fn index_docs(config: &Config, dir: &Path, output: &Path, api_key: &str) -> Result<()> {
    let client = EmbeddingClient::new(&config.openai, api_key);
    let stats = Indexer::new(client, config.indexing.clone())
        .index_directory(dir, output)
        .await
        .with_context(|| format!("Failed to index {}", dir.display()))?;

    println!("✅ Indexing completed!");
    println!("  Files read: {}", stats.files_read);
    println!("  Chunks indexed: {}", stats.chunks_indexed);
    println!("  Dimensions: {}", stats.dimension);
    println!("  Output: {}", stats.output.display());
    println!("  Duration: {:.1}s", stats.duration.as_secs_f64());
    Ok(())
}
