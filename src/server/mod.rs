//! HTTP deployment mode: a single `POST /chat` endpoint answering one question per request.
//!
//! Failures are reported in the JSON body with `"status": "error"`, never as HTTP error codes,
//! which is what the documentation widget expects.

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::ChatBotError;
use crate::chat::{ChatService, NOT_AVAILABLE_REPLY, fallback_reply};
use crate::config::ServerConfig;

pub const MESSAGE_TOO_LONG_REPLY: &str = "sorry, the message is too long";
pub const HTTP_PROMPT_TOO_LONG_REPLY: &str = "Sorry, prompt too long";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub status: ChatStatus,
    pub received_message: String,
}

impl ChatResponse {
    #[inline]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ChatStatus::Success,
            received_message: message.into(),
        }
    }

    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ChatStatus::Error,
            received_message: message.into(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    service: Arc<ChatService>,
    max_message_chars: usize,
}

/// Build the router serving `/chat` and `/health`
pub fn router(service: Arc<ChatService>, max_message_chars: usize) -> Router {
    let state = AppState {
        service,
        max_message_chars,
    };
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Json<ChatResponse> {
    let message = request.message;
    info!("message: {}", message);

    if message.chars().count() > state.max_message_chars {
        return Json(ChatResponse::error(MESSAGE_TOO_LONG_REPLY));
    }
    if message.trim().is_empty() {
        return Json(ChatResponse::error("message is empty"));
    }

    let response = match state.service.answer(&message).await {
        Ok(reply) => ChatResponse::success(reply),
        Err(ChatBotError::PromptTooLarge) => ChatResponse::success(HTTP_PROMPT_TOO_LONG_REPLY),
        Err(e @ ChatBotError::UpstreamRejected(_)) => {
            error!("Completion rejected: {}", e);
            ChatResponse::error(NOT_AVAILABLE_REPLY)
        }
        Err(e) => {
            error!("Failed to answer HTTP question [{}]: {}", e.code(), e);
            ChatResponse::error(fallback_reply(&e))
        }
    };
    Json(response)
}

/// Serve HTTP until `shutdown` fires, over TLS when both key and certificate are configured
pub async fn serve(
    config: &ServerConfig,
    service: Arc<ChatService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(service, config.max_message_chars);
    let addr = format!("{}:{}", config.host, config.port);

    if let (Some(keyfile), Some(certfile)) = (&config.ssl_keyfile, &config.ssl_certfile) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(certfile, keyfile)
            .await
            .with_context(|| {
                format!(
                    "Failed to load TLS key {} and certificate {}",
                    keyfile.display(),
                    certfile.display()
                )
            })?;
        let socket: SocketAddr = tokio::net::lookup_host(&addr)
            .await
            .with_context(|| format!("Failed to resolve {addr}"))?
            .next()
            .with_context(|| format!("No address for {addr}"))?;

        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            if shutdown.changed().await.is_ok() {
                stopper.graceful_shutdown(Some(Duration::from_secs(10)));
            }
        });

        info!("Serving HTTPS on {}", socket);
        axum_server::bind_rustls(socket, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTPS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!("Serving HTTP on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if shutdown.changed().await.is_err() {
                    warn!("Shutdown channel closed");
                }
            })
            .await
            .context("HTTP server failed")?;
    }

    info!("Server stopped");
    Ok(())
}
