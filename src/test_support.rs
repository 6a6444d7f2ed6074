//! Test doubles for the completion endpoint, the embedding endpoint and the platform

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat::completion::{ChatCompletion, CompletionError, DeltaReceiver};
use crate::chat::{Bot, BotPool, ChatService};
use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingIndex};
use crate::messaging::MessageSink;
use crate::prompt::{PromptBuilder, PromptBundle, TokenCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Answer,
    Reject,
    Unavailable,
    BreakOff,
    /// Streams "Cats " and then goes silent without closing the stream
    Stall,
}

/// Completion backend that replies "Cats are great." in three deltas
pub struct ScriptedClient {
    script: Script,
    deltas: Vec<&'static str>,
    prompts: Mutex<Vec<PromptBundle>>,
    silent: Mutex<Vec<mpsc::Sender<Result<String, CompletionError>>>>,
}

impl ScriptedClient {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            deltas: vec!["Cats ", "are ", "great."],
            prompts: Mutex::new(Vec::new()),
            silent: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<PromptBundle> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    fn record(&self, prompt: &PromptBundle) {
        self.prompts.lock().expect("prompts lock").push(prompt.clone());
    }
}

#[async_trait]
impl ChatCompletion for ScriptedClient {
    async fn complete(&self, prompt: &PromptBundle) -> Result<String, CompletionError> {
        self.record(prompt);
        match self.script {
            Script::Answer | Script::BreakOff => Ok(self.deltas.concat()),
            Script::Stall => Err(CompletionError::Timeout),
            Script::Reject => Err(CompletionError::Rejected { status: 400 }),
            Script::Unavailable => Err(CompletionError::Unavailable("HTTP 503".to_string())),
        }
    }

    async fn stream(&self, prompt: &PromptBundle) -> Result<DeltaReceiver, CompletionError> {
        self.record(prompt);
        let (tx, rx) = mpsc::channel(16);
        match self.script {
            Script::Answer => {
                for delta in &self.deltas {
                    tx.try_send(Ok(delta.to_string())).expect("channel has room");
                }
            }
            Script::BreakOff => {
                tx.try_send(Ok("Cats ".to_string())).expect("channel has room");
                tx.try_send(Err(CompletionError::Timeout)).expect("channel has room");
            }
            Script::Stall => {
                tx.try_send(Ok("Cats ".to_string())).expect("channel has room");
                self.silent.lock().expect("silent lock").push(tx);
            }
            Script::Reject => return Err(CompletionError::Rejected { status: 400 }),
            Script::Unavailable => {
                return Err(CompletionError::Unavailable("HTTP 503".to_string()));
            }
        }
        Ok(rx)
    }
}

/// Embeds every text as `[1, 0]`
pub struct FixedEmbedder {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("embedding endpoint unreachable");
        }
        Ok(vec![1.0, 0.0])
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
    acknowledged: Mutex<Vec<String>>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    /// A sink whose sends fail once `sends` messages went through
    pub fn failing_after(sends: usize) -> Self {
        Self {
            fail_after: Some(sends),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().expect("ack lock").clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_text(
        &self,
        conversation_id: &str,
        _user_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let mut sent = self.sent.lock().expect("sent lock");
        if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
            anyhow::bail!("connection to the platform lost");
        }
        sent.push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn acknowledge(&self, message_id: &str) -> anyhow::Result<()> {
        self.acknowledged
            .lock()
            .expect("ack lock")
            .push(message_id.to_string());
        Ok(())
    }
}

/// "cats are great" scores 0.9 and "dogs are great" 0.2 against `[1, 0]`
pub fn pets_index() -> Arc<EmbeddingIndex> {
    Arc::new(
        EmbeddingIndex::from_entries([
            ("cats are great".to_string(), vec![0.9, (1.0f32 - 0.81).sqrt()]),
            ("dogs are great".to_string(), vec![0.2, (1.0f32 - 0.04).sqrt()]),
        ])
        .expect("index is valid"),
    )
}

/// Route log output through the test harness; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn service_with(
    clients: Vec<Arc<ScriptedClient>>,
    config: &Config,
    fail_embed: bool,
) -> ChatService {
    init_tracing();
    let bots = clients
        .into_iter()
        .enumerate()
        .map(|(i, client)| Arc::new(Bot::new(format!("bot-{i}"), client)))
        .collect();
    let counter = TokenCounter::for_model("gpt-3.5-turbo").expect("tokenizer should load");
    ChatService::new(
        BotPool::new(bots),
        Arc::new(FixedEmbedder {
            calls: AtomicUsize::new(0),
            fail: fail_embed,
        }),
        pets_index(),
        PromptBuilder::new(counter, &config.retrieval),
        config,
    )
}

pub fn service(client: Arc<ScriptedClient>) -> ChatService {
    service_with(vec![client], &Config::default(), false)
}
