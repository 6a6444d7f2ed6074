#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docs_chat_bot::chat::completion::{ChatCompletion, CompletionError, DeltaReceiver};
use docs_chat_bot::chat::{Bot, BotPool, ChatService};
use docs_chat_bot::config::Config;
use docs_chat_bot::embeddings::{Embedder, EmbeddingIndex};
use docs_chat_bot::messaging::MessageSink;
use docs_chat_bot::prompt::{PromptBuilder, PromptBundle, TokenCounter};

/// Completion backend that always answers `reply` and remembers every prompt
pub struct EchoCompletion {
    reply: String,
    prompts: Mutex<Vec<PromptBundle>>,
}

impl EchoCompletion {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<PromptBundle> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for EchoCompletion {
    async fn complete(&self, prompt: &PromptBundle) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(self.reply.clone())
    }

    async fn stream(&self, prompt: &PromptBundle) -> Result<DeltaReceiver, CompletionError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.try_send(Ok(self.reply.clone())).unwrap();
        Ok(rx)
    }
}

/// Every question embeds to the x axis
pub struct AxisEmbedder;

#[async_trait]
impl Embedder for AxisEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn conversations(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(conversation, _)| conversation.clone())
            .collect()
    }
}

#[async_trait]
impl MessageSink for Outbox {
    async fn send_text(
        &self,
        conversation_id: &str,
        _user_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Unit vector whose similarity to the x axis is `score`
pub fn scored(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).sqrt()]
}

pub fn index(entries: &[(&str, f32)]) -> Arc<EmbeddingIndex> {
    Arc::new(
        EmbeddingIndex::from_entries(
            entries
                .iter()
                .map(|(chunk, score)| (chunk.to_string(), scored(*score))),
        )
        .unwrap(),
    )
}

/// Route log output through the test harness; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn service(
    completion: Arc<EchoCompletion>,
    index: Arc<EmbeddingIndex>,
    config: &Config,
) -> ChatService {
    init_tracing();
    let counter = TokenCounter::for_model(&config.openai.chat_model).unwrap();
    ChatService::new(
        BotPool::new(vec![Arc::new(Bot::new("bot-1", completion))]),
        Arc::new(AxisEmbedder),
        index,
        PromptBuilder::new(counter, &config.retrieval),
        config,
    )
}
