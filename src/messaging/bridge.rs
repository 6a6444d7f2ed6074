//! JSON-lines bridge to the messaging platform connection.
//!
//! Inbound events arrive one JSON object per line. Replies and receipts leave the same
//! way on the writer.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::event::{InboundEvent, PLAIN_TEXT, encode_text};
use super::{MessageRouter, MessageSink};

/// One line written back to the platform connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    CreateMessage {
        conversation_id: String,
        recipient_id: String,
        message_id: String,
        category: String,
        data: String,
    },
    AcknowledgeMessageReceipt {
        message_id: String,
    },
}

impl OutboundMessage {
    #[inline]
    pub fn text(conversation_id: &str, recipient_id: &str, text: &str) -> Self {
        Self::CreateMessage {
            conversation_id: conversation_id.to_string(),
            recipient_id: recipient_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            category: PLAIN_TEXT.to_string(),
            data: encode_text(text),
        }
    }
}

/// [`MessageSink`] writing [`OutboundMessage`] lines
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    #[inline]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[inline]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn write(&self, message: &OutboundMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> MessageSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_text(&self, conversation_id: &str, user_id: &str, text: &str) -> Result<()> {
        self.write(&OutboundMessage::text(conversation_id, user_id, text))
            .await
    }

    async fn acknowledge(&self, message_id: &str) -> Result<()> {
        self.write(&OutboundMessage::AcknowledgeMessageReceipt {
            message_id: message_id.to_string(),
        })
        .await
    }
}

/// Feed every event line from `reader` to `router` until EOF or shutdown.
///
/// Malformed lines are logged and skipped. Answers still running when the input ends
/// are awaited before returning.
pub async fn serve_lines<R>(
    reader: R,
    router: Arc<MessageRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    info!("Serving messaging events");

    let mut lines = reader.lines();
    let mut tasks = Vec::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => {
                info!("Shutdown requested, no longer reading events");
                return Ok(());
            }
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundEvent>(line) {
                    Ok(event) => {
                        if let Some(task) = router.on_event(event).await {
                            tasks.push(task);
                        }
                    }
                    Err(e) => error!("Failed to parse event: {}", e),
                }
                tasks.retain(|task| !task.is_finished());
            }
            Ok(None) => {
                info!("EOF reached, closing connection");
                break;
            }
            Err(e) => {
                error!("Error reading events: {}", e);
                break;
            }
        }
    }

    debug!("Waiting for {} answers in flight", tasks.len());
    for task in tasks {
        if let Err(e) = task.await {
            error!("Answer task failed: {}", e);
        }
    }
    Ok(())
}
