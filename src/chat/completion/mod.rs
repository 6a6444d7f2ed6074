//! Chat completion client for an OpenAI-compatible `/chat/completions` endpoint.
//!
//! Requests go through a blocking `ureq` agent on the blocking thread pool. In
//! streaming mode the server-sent event lines are parsed on that thread and the content
//! deltas are forwarded over a channel.

mod batcher;

#[cfg(test)]
mod tests;

use std::io::{BufRead, BufReader};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ChatBotError;
use crate::config::OpenAiConfig;
use crate::embeddings::openai::endpoint;
use crate::prompt::{Message, PromptBundle};

pub use batcher::{FLUSH_INTERVAL, FragmentBatcher};

/// Content deltas of one streamed reply, closed when the reply ends
pub type DeltaReceiver = mpsc::Receiver<Result<String, CompletionError>>;

const DELTA_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum CompletionError {
    /// The endpoint refused the request itself (bad payload, context too long, bad key)
    #[error("Request rejected with HTTP {status}")]
    Rejected { status: u16 },
    #[error("Completion endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("Completion request timed out")]
    Timeout,
    #[error("Malformed completion response: {0}")]
    Parse(String),
}

impl From<CompletionError> for ChatBotError {
    fn from(error: CompletionError) -> Self {
        match error {
            rejected @ CompletionError::Rejected { .. } => {
                ChatBotError::UpstreamRejected(rejected.to_string())
            }
            other => ChatBotError::Upstream(other.to_string()),
        }
    }
}

impl From<ureq::Error> for CompletionError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::StatusCode(status) if (400..500).contains(&status) && status != 429 => {
                CompletionError::Rejected { status }
            }
            ureq::Error::StatusCode(status) => {
                CompletionError::Unavailable(format!("HTTP {}", status))
            }
            ureq::Error::Timeout(_) => CompletionError::Timeout,
            other => CompletionError::Unavailable(other.to_string()),
        }
    }
}

/// A chat model that answers a prompt, either whole or as a stream of deltas
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, prompt: &PromptBundle) -> Result<String, CompletionError>;

    /// Start a streamed reply. Errors raised before the first delta are returned
    /// directly; later ones arrive on the receiver.
    async fn stream(&self, prompt: &PromptBundle) -> Result<DeltaReceiver, CompletionError>;

    /// Release upstream resources before shutdown
    async fn close(&self) {}
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    endpoint: String,
    api_key: String,
    model: String,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: serde_json::Map<String, serde_json::Value>,
}

/// One parsed server-sent event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
    /// Comments, blank lines, and deltas without content
    Skip,
}

/// Parse one line of a streamed chat completion
#[inline]
pub fn parse_sse_line(line: &str) -> Result<SseEvent, CompletionError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| CompletionError::Parse(e.to_string()))?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(SseEvent::Skip);
    };
    // An empty delta marks the end of the reply.
    if choice.delta.is_empty() {
        return Ok(SseEvent::Done);
    }
    match choice.delta.get("content").and_then(|c| c.as_str()) {
        Some(content) => Ok(SseEvent::Delta(content.to_string())),
        None => Ok(SseEvent::Skip),
    }
}

/// Longest streamed body, in multiples of the request timeout
const STREAM_BODY_TIMEOUTS: u32 = 20;

impl OpenAiChatClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        // A streamed reply may take longer than the timeout to finish. The reader gives up
        // after one timeout without a delta; the body cap only frees the blocking thread.
        let stream_agent = ureq::Agent::config_builder()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout * STREAM_BODY_TIMEOUTS))
            .build()
            .into();

        Self {
            endpoint: endpoint(&config.base_url, "chat/completions"),
            api_key: api_key.into(),
            model: config.chat_model.clone(),
            agent,
            stream_agent,
        }
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &PromptBundle, stream: bool) -> Result<String, CompletionError> {
        let messages = prompt.messages();
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream,
        };
        serde_json::to_string(&request).map_err(|e| CompletionError::Parse(e.to_string()))
    }

    /// Send a non-streaming completion request and return the reply text
    pub fn complete_blocking(&self, prompt: &PromptBundle) -> Result<String, CompletionError> {
        let body = self.request_body(prompt, false)?;
        let authorization = format!("Bearer {}", self.api_key.trim());

        let text = self
            .agent
            .post(self.endpoint.as_str())
            .header("Authorization", authorization.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| {
                warn!("Chat completion request failed: {}", e);
                CompletionError::from(e)
            })?;

        let response: ChatResponse =
            serde_json::from_str(&text).map_err(|e| CompletionError::Parse(e.to_string()))?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Parse("response has no choices".to_string()))?;

        info!("Completion reply: {} characters", reply.chars().count());
        Ok(reply)
    }

    /// Send a streaming completion request and forward deltas to `tx`.
    ///
    /// `ready` is answered once the response head has arrived.
    fn stream_blocking(
        &self,
        prompt: &PromptBundle,
        ready: oneshot::Sender<Result<(), CompletionError>>,
        tx: mpsc::Sender<Result<String, CompletionError>>,
    ) {
        let body = match self.request_body(prompt, true) {
            Ok(body) => body,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let authorization = format!("Bearer {}", self.api_key.trim());

        let response = self
            .stream_agent
            .post(self.endpoint.as_str())
            .header("Authorization", authorization.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .send(&body);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Streaming completion request failed: {}", e);
                let _ = ready.send(Err(e.into()));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }

        let reader = BufReader::new(response.into_body().into_reader());
        let mut deltas = 0usize;
        for line in reader.lines() {
            let event = match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => Err(CompletionError::Unavailable(e.to_string())),
            };
            match event {
                Ok(SseEvent::Delta(delta)) => {
                    deltas += 1;
                    if tx.blocking_send(Ok(delta)).is_err() {
                        debug!("Delta receiver dropped, abandoning stream");
                        return;
                    }
                }
                Ok(SseEvent::Done) => break,
                Ok(SseEvent::Skip) => {}
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        }
        debug!("Stream finished after {} deltas", deltas);
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, prompt: &PromptBundle) -> Result<String, CompletionError> {
        let client = self.clone();
        let prompt = prompt.clone();
        tokio::task::spawn_blocking(move || client.complete_blocking(&prompt))
            .await
            .map_err(|e| CompletionError::Unavailable(format!("completion task failed: {e}")))?
    }

    async fn stream(&self, prompt: &PromptBundle) -> Result<DeltaReceiver, CompletionError> {
        let client = self.clone();
        let prompt = prompt.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || client.stream_blocking(&prompt, ready_tx, tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CompletionError::Unavailable(
                "completion task ended before responding".to_string(),
            )),
        }
    }
}
