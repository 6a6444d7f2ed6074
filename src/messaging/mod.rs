//! Messaging platform adapter.
//!
//! The platform connection itself runs outside this process and talks to the bot through
//! the JSON-lines bridge in [`bridge`]. [`MessageRouter`] decides what each inbound event
//! deserves: nothing, a canned greeting, or a question for the [`ChatService`].

pub mod bridge;
pub mod event;


use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatService, ReplyMode};
use crate::ChatBotError;

pub use bridge::{JsonLinesSink, OutboundMessage, serve_lines};
pub use event::{
    Action, InboundEvent, MessageView, decode_text, greeting, unique_conversation_id,
};

/// Outgoing side of the messaging platform
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, conversation_id: &str, user_id: &str, text: &str)
    -> anyhow::Result<()>;

    /// Confirm that an inbound message was received
    async fn acknowledge(&self, _message_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What an inbound event turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Ignore,
    Greeting {
        conversation_id: String,
        user_id: String,
        reply: &'static str,
    },
    Question {
        conversation_id: String,
        user_id: String,
        text: String,
        mode: ReplyMode,
    },
}

/// Where unexpected failures are reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Developer {
    pub conversation_id: String,
    pub user_id: String,
}

pub struct MessageRouter {
    service: Arc<ChatService>,
    sink: Arc<dyn MessageSink>,
    client_id: String,
    developer: Option<Developer>,
}

impl MessageRouter {
    #[inline]
    pub fn new(
        service: Arc<ChatService>,
        sink: Arc<dyn MessageSink>,
        client_id: impl Into<String>,
        developer: Option<Developer>,
    ) -> Self {
        Self {
            service,
            sink,
            client_id: client_id.into(),
            developer,
        }
    }

    #[inline]
    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    #[inline]
    pub fn sink(&self) -> &Arc<dyn MessageSink> {
        &self.sink
    }

    /// Decide how to answer `event`
    pub fn classify(&self, event: &InboundEvent) -> Inbound {
        let Some(action) = Action::parse(&event.action) else {
            info!("Unknown action {}", event.action);
            return Inbound::Ignore;
        };
        if action != Action::CreateMessage {
            return Inbound::Ignore;
        }
        let Some(message) = &event.data else {
            return Inbound::Ignore;
        };

        if !message.is_known_category() {
            info!("Unknown category: {}", message.category);
            return Inbound::Ignore;
        }
        if !message.is_plain_text() {
            return Inbound::Ignore;
        }

        let Some(text) = decode_text(&message.data) else {
            debug!("Dropping undecodable or bare mention message {}", message.message_id);
            return Inbound::Ignore;
        };

        if let Some(reply) = greeting(&text) {
            return Inbound::Greeting {
                conversation_id: message.conversation_id.clone(),
                user_id: message.user_id.clone(),
                reply,
            };
        }

        let direct = unique_conversation_id(&message.user_id, &self.client_id);
        let mode = if direct == message.conversation_id {
            ReplyMode::Stream
        } else {
            ReplyMode::Collect
        };

        Inbound::Question {
            conversation_id: message.conversation_id.clone(),
            user_id: message.user_id.clone(),
            text,
            mode,
        }
    }

    /// Handle one inbound event.
    ///
    /// Questions are answered on their own task, whose handle is returned.
    pub async fn on_event(self: &Arc<Self>, event: InboundEvent) -> Option<JoinHandle<()>> {
        if Action::parse(&event.action) == Some(Action::CreateMessage) {
            if let Some(message) = &event.data {
                debug!(
                    "Message {} in conversation {} from {}",
                    message.message_id, message.conversation_id, message.user_id
                );
                if let Err(e) = self.sink.acknowledge(&message.message_id).await {
                    warn!("Failed to acknowledge message {}: {:#}", message.message_id, e);
                }
            }
        }

        match self.classify(&event) {
            Inbound::Ignore => None,
            Inbound::Greeting {
                conversation_id,
                user_id,
                reply,
            } => {
                if let Err(e) = self.sink.send_text(&conversation_id, &user_id, reply).await {
                    warn!("Failed to send greeting to {}: {:#}", conversation_id, e);
                }
                None
            }
            Inbound::Question {
                conversation_id,
                user_id,
                text,
                mode,
            } => {
                let router = Arc::clone(self);
                Some(tokio::spawn(async move {
                    router
                        .answer(&conversation_id, &user_id, &text, mode)
                        .await;
                }))
            }
        }
    }

    async fn answer(&self, conversation_id: &str, user_id: &str, text: &str, mode: ReplyMode) {
        let result = self
            .service
            .handle_question(conversation_id, user_id, text, mode, self.sink.as_ref())
            .await;

        if let Err(e) = result {
            error!(
                "Failed to answer {} in conversation {} [{}]: {}",
                user_id,
                conversation_id,
                e.code(),
                e
            );
            if mode == ReplyMode::Stream {
                self.notify_developer(&e).await;
            }
        }
    }

    async fn notify_developer(&self, error: &ChatBotError) {
        let Some(developer) = &self.developer else {
            return;
        };
        let report = format!(
            "exception occur at:{}: [{}] {}",
            chrono::Utc::now().to_rfc3339(),
            error.code(),
            error
        );
        if let Err(e) = self
            .sink
            .send_text(&developer.conversation_id, &developer.user_id, &report)
            .await
        {
            warn!("Failed to notify developer: {:#}", e);
        }
    }
}
