use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docs_chat_bot::commands::{config_command, index_docs, load_config, run_bot, serve_http};
use docs_chat_bot::config::Config;
use docs_chat_bot::{ChatBotError, Result};

#[derive(Parser)]
#[command(name = "docs-chat-bot")]
#[command(about = "Answers documentation questions from indexed docs through a chat completion API")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true, env = "DOCS_CHAT_BOT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configuration, or write the default config file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Serve the HTTP `/chat` endpoint
    Serve {
        /// The host IP address to listen on
        #[arg(long)]
        host: Option<String>,
        /// The port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// OpenAI API key, repeat to start one bot per key
        #[arg(long = "api-key")]
        api_keys: Vec<String>,
        /// The indexed docs file
        #[arg(long)]
        indexed_docs: Option<PathBuf>,
        /// TLS private key (PEM)
        #[arg(long)]
        ssl_keyfile: Option<PathBuf>,
        /// TLS certificate (PEM)
        #[arg(long)]
        ssl_certfile: Option<PathBuf>,
    },
    /// Answer messaging platform events read from stdin
    Bot {
        /// OpenAI API key, repeat to start one bot per key
        #[arg(long = "api-key")]
        api_keys: Vec<String>,
        /// The indexed docs file
        #[arg(long)]
        indexed_docs: Option<PathBuf>,
        /// The bot's own user id on the messaging platform
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Index a documentation tree into an embeddings file
    Index {
        /// The directory containing the documents to be indexed
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// The file path to save the indexed output
        #[arg(long, default_value = "indexed_docs.json")]
        output: PathBuf,
        /// OpenAI API key
        #[arg(long)]
        api_key: Option<String>,
    },
}

fn checked(config: Config) -> Result<Config> {
    config
        .validate()
        .map_err(|e| ChatBotError::Configuration(e.to_string()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            config_command(&config, show)?;
        }
        Commands::Serve {
            host,
            port,
            api_keys,
            indexed_docs,
            ssl_keyfile,
            ssl_certfile,
        } => {
            if let Some(host) = host {
                config
                    .server
                    .set_host(host)
                    .map_err(|e| ChatBotError::InvalidArgument(e.to_string()))?;
            }
            if let Some(port) = port {
                config
                    .server
                    .set_port(port)
                    .map_err(|e| ChatBotError::InvalidArgument(e.to_string()))?;
            }
            if let Some(indexed_docs) = indexed_docs {
                config.indexed_docs = indexed_docs;
            }
            if ssl_keyfile.is_some() || ssl_certfile.is_some() {
                config.server.ssl_keyfile = ssl_keyfile;
                config.server.ssl_certfile = ssl_certfile;
            }
            let config = checked(config)?;
            let keys = config.resolve_api_keys(&api_keys)?;
            serve_http(config, &keys).await?;
        }
        Commands::Bot {
            api_keys,
            indexed_docs,
            client_id,
        } => {
            if let Some(indexed_docs) = indexed_docs {
                config.indexed_docs = indexed_docs;
            }
            if client_id.is_some() {
                config.bot.client_id = client_id;
            }
            let config = checked(config)?;
            let keys = config.resolve_api_keys(&api_keys)?;
            run_bot(config, &keys).await?;
        }
        Commands::Index {
            dir,
            output,
            api_key,
        } => {
            let config = checked(config)?;
            let keys = config.resolve_api_keys(api_key.as_slice())?;
            let key = keys
                .first()
                .ok_or_else(|| ChatBotError::Configuration("no API key".to_string()))?;
            index_docs(&config, &dir, &output, key).await?;
        }
    }

    Ok(())
}
