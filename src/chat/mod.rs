//! Question answering: rate limiting, bot routing, prompt assembly and reply delivery.
//!
//! [`ChatService`] is the application context shared by the HTTP server and the
//! messaging bridge. It owns the loaded index and every bot. Replies always start with a
//! `[BEGIN]` marker. Direct conversations receive fragments as they stream in, followed by
//! `[END]`. Other conversations receive the whole reply at once, ending in `\n[END]`.
//! Questions that cannot be answered right away wait in the [`QuestionQueue`].

pub mod bot;
pub mod completion;
pub mod queue;
pub mod rate_limit;


use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::embeddings::index::normalize;
use crate::embeddings::{Embedder, EmbeddingIndex};
use crate::messaging::MessageSink;
use crate::prompt::{PromptBuilder, PromptBundle};
use crate::{ChatBotError, Result};

pub use bot::{Bot, BotPool};
pub use completion::{ChatCompletion, CompletionError, FragmentBatcher, OpenAiChatClient};
pub use queue::{QuestionQueue, SavedQuestion};
pub use rate_limit::RateLimiter;

pub const BEGIN_MARKER: &str = "[BEGIN]";
pub const END_MARKER: &str = "[END]";

/// Reply when the completion endpoint refuses the request
pub const NOT_AVAILABLE_REPLY: &str = "Sorry, I am not available now.";
/// Reply when the question does not fit the token budget
pub const PROMPT_TOO_LONG_REPLY: &str =
    "oops, something went wrong, please try to reduce your words.";

/// Generic reply for failures that have no dedicated wording
#[inline]
pub fn fallback_reply(error: &ChatBotError) -> String {
    format!("oops! something went wrong ({})", error.code())
}

/// How a reply reaches its conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Fragments are sent as they arrive, then `[END]`
    Stream,
    /// One message holding the whole reply and `\n[END]`
    Collect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Queued,
}

/// Result of one delivery try
struct Attempt {
    outcome: Result<Delivery>,
    /// Part of the reply was sent, so repeating the question would answer it twice
    reached_user: bool,
}

impl Attempt {
    #[inline]
    fn untouched(outcome: Result<Delivery>) -> Self {
        Self {
            outcome,
            reached_user: false,
        }
    }

    #[inline]
    fn needs_retry(&self) -> bool {
        !self.reached_user && !matches!(self.outcome, Ok(Delivery::Delivered))
    }
}

/// Receiver of reply fragments
#[async_trait]
pub trait FragmentSink: Send {
    async fn fragment(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Forwards every fragment straight to the conversation
struct StreamedReply<'a> {
    sink: &'a dyn MessageSink,
    conversation_id: &'a str,
    user_id: &'a str,
    sent: usize,
}

#[async_trait]
impl FragmentSink for StreamedReply<'_> {
    async fn fragment(&mut self, text: &str) -> anyhow::Result<()> {
        self.sink
            .send_text(self.conversation_id, self.user_id, text)
            .await?;
        self.sent += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CollectedReply {
    parts: Vec<String>,
}

#[async_trait]
impl FragmentSink for CollectedReply {
    async fn fragment(&mut self, text: &str) -> anyhow::Result<()> {
        self.parts.push(text.to_string());
        Ok(())
    }
}

pub struct ChatService {
    pool: BotPool,
    limiter: RateLimiter,
    queue: QuestionQueue,
    embedder: Arc<dyn Embedder>,
    index: Arc<EmbeddingIndex>,
    prompts: PromptBuilder,
    guide: String,
    max_prompt_tokens: usize,
    streaming: bool,
    stream_idle_timeout: Duration,
    retry_interval: Duration,
}

impl ChatService {
    pub fn new(
        pool: BotPool,
        embedder: Arc<dyn Embedder>,
        index: Arc<EmbeddingIndex>,
        prompts: PromptBuilder,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            limiter: RateLimiter::from_config(&config.rate_limit),
            queue: QuestionQueue::new(),
            embedder,
            index,
            prompts,
            guide: config
                .retrieval
                .guide
                .clone()
                .unwrap_or_else(|| crate::prompt::DEFAULT_GUIDE.to_string()),
            max_prompt_tokens: config.retrieval.max_prompt_tokens,
            streaming: config.openai.stream,
            stream_idle_timeout: Duration::from_secs(config.openai.timeout_seconds),
            retry_interval: Duration::from_secs(config.queue.retry_interval_seconds),
        }
    }

    #[inline]
    pub fn pool(&self) -> &BotPool {
        &self.pool
    }

    #[inline]
    pub fn queue(&self) -> &QuestionQueue {
        &self.queue
    }

    #[inline]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[inline]
    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Embed `question` and assemble its prompt
    pub async fn prepare_prompt(&self, question: &str) -> Result<PromptBundle> {
        let mut query = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| ChatBotError::Upstream(format!("{e:#}")))?;
        normalize(&mut query);

        self.prompts.build_prompt(
            question,
            &query,
            &self.index,
            &self.guide,
            self.max_prompt_tokens,
        )
    }

    /// Answer a question from the messaging platform.
    ///
    /// A question that cannot be delivered is queued for the retry loop, unless part of
    /// the reply already reached the conversation. Errors are returned after queueing so
    /// the caller can report them.
    pub async fn handle_question(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        mode: ReplyMode,
        sink: &dyn MessageSink,
    ) -> Result<Delivery> {
        if text.trim().is_empty() {
            debug!("Ignoring empty question from {}", user_id);
            return Ok(Delivery::Delivered);
        }

        let attempt = self
            .deliver(conversation_id, user_id, text, mode, sink)
            .await;
        if attempt.needs_retry() {
            self.queue
                .save(SavedQuestion::new(conversation_id, user_id, text))
                .await;
        }
        attempt.outcome
    }

    async fn deliver(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        mode: ReplyMode,
        sink: &dyn MessageSink,
    ) -> Attempt {
        let Some(bot) = self.pool.assign(user_id).await else {
            info!("No bot available for user {}, queueing question", user_id);
            return Attempt::untouched(Ok(Delivery::Queued));
        };
        debug!("User {} routed to bot {}", user_id, bot.name());

        match mode {
            ReplyMode::Stream => {
                let mut reply = StreamedReply {
                    sink,
                    conversation_id,
                    user_id,
                    sent: 0,
                };
                let mut outcome = self
                    .reply_with(&bot, conversation_id, user_id, text, &mut reply)
                    .await;
                if outcome.is_ok() {
                    outcome = sink
                        .send_text(conversation_id, user_id, END_MARKER)
                        .await
                        .map_err(ChatBotError::Other);
                }
                match outcome {
                    Ok(()) => Attempt::untouched(Ok(Delivery::Delivered)),
                    Err(e) if reply.sent > 0 => {
                        warn!(
                            "Reply to user {} broke off after {} fragments: {}",
                            user_id, reply.sent, e
                        );
                        Attempt {
                            outcome: Err(e),
                            reached_user: true,
                        }
                    }
                    Err(e) => Attempt::untouched(Err(e)),
                }
            }
            ReplyMode::Collect => {
                let mut reply = CollectedReply::default();
                let outcome = match self
                    .reply_with(&bot, conversation_id, user_id, text, &mut reply)
                    .await
                {
                    Ok(()) => {
                        let message = format!("{}\n{}", reply.parts.concat(), END_MARKER);
                        sink.send_text(conversation_id, user_id, &message)
                            .await
                            .map(|()| Delivery::Delivered)
                            .map_err(ChatBotError::Other)
                    }
                    Err(e) => Err(e),
                };
                Attempt::untouched(outcome)
            }
        }
    }

    /// Produce the reply fragments for one question on `bot`.
    ///
    /// Rate limiting, oversized prompts and rejected requests end in a user-facing reply.
    /// Anything else is returned as an error before a single fragment is emitted.
    pub async fn reply_with(
        &self,
        bot: &Bot,
        conversation_id: &str,
        user_id: &str,
        question: &str,
        out: &mut dyn FragmentSink,
    ) -> Result<()> {
        if let Err(limited) = self.limiter.check_and_record(conversation_id).await {
            info!("Conversation {}: {}", conversation_id, limited);
            return emit(out, &[BEGIN_MARKER, &limited.to_string()]).await;
        }

        let _slot = bot.acquire().await;

        let prompt = match self.prepare_prompt(question).await {
            Ok(prompt) => prompt,
            Err(ChatBotError::PromptTooLarge) => {
                warn!("Question from {} does not fit the prompt budget", user_id);
                return emit(out, &[BEGIN_MARKER, PROMPT_TOO_LONG_REPLY]).await;
            }
            Err(e) => return Err(e),
        };

        if self.streaming {
            self.stream_reply(bot, &prompt, out).await
        } else {
            match bot.client().complete(&prompt).await {
                Ok(reply) => emit(out, &[BEGIN_MARKER, &reply]).await,
                Err(CompletionError::Rejected { status }) => {
                    error!("Completion rejected by bot {} (HTTP {})", bot.name(), status);
                    emit(out, &[BEGIN_MARKER, NOT_AVAILABLE_REPLY]).await
                }
                Err(e) => Err(e.into()),
            }
        }
    }

    async fn stream_reply(
        &self,
        bot: &Bot,
        prompt: &PromptBundle,
        out: &mut dyn FragmentSink,
    ) -> Result<()> {
        let mut deltas = match bot.client().stream(prompt).await {
            Ok(deltas) => deltas,
            Err(CompletionError::Rejected { status }) => {
                error!("Completion rejected by bot {} (HTTP {})", bot.name(), status);
                return emit(out, &[BEGIN_MARKER, NOT_AVAILABLE_REPLY]).await;
            }
            Err(e) => return Err(e.into()),
        };

        emit(out, &[BEGIN_MARKER]).await?;

        let mut batcher = FragmentBatcher::new(Instant::now());
        let mut characters = 0usize;
        loop {
            let next = tokio::time::timeout(self.stream_idle_timeout, deltas.recv()).await;
            let delta = match next {
                Ok(Some(delta)) => delta,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Stream from bot {} sent nothing for {:?}",
                        bot.name(),
                        self.stream_idle_timeout
                    );
                    Err(CompletionError::Timeout)
                }
            };
            match delta {
                Ok(delta) => {
                    characters += delta.chars().count();
                    if let Some(fragment) = batcher.push(&delta, Instant::now()) {
                        emit(out, &[&fragment]).await?;
                    }
                }
                Err(e) => {
                    let error = ChatBotError::from(e);
                    error!("Stream from bot {} broke off: {}", bot.name(), error);
                    if let Some(fragment) = batcher.finish() {
                        emit(out, &[&fragment]).await?;
                    }
                    return emit(out, &[&fallback_reply(&error)]).await;
                }
            }
        }
        if let Some(fragment) = batcher.finish() {
            emit(out, &[&fragment]).await?;
        }

        info!("Streamed reply of {} characters", characters);
        Ok(())
    }

    /// Answer a question from the HTTP endpoint with the whole reply text
    pub async fn answer(&self, question: &str) -> Result<String> {
        let bot = self
            .pool
            .choose_least_busy()
            .ok_or(ChatBotError::NoCapacity)?;
        debug!("HTTP request routed to bot {}", bot.name());

        let _slot = bot.acquire().await;
        let prompt = self.prepare_prompt(question).await?;
        let reply = bot.client().complete(&prompt).await?;
        Ok(reply)
    }

    /// Try every queued question once, removing the ones that got delivered
    pub async fn retry_pending(&self, sink: &dyn MessageSink) -> usize {
        let pending = self.queue.snapshot().await;
        if pending.is_empty() {
            return 0;
        }
        debug!("Retrying {} queued questions", pending.len());

        let mut delivered = 0;
        for question in pending {
            let attempt = self
                .deliver(
                    &question.conversation_id,
                    &question.user_id,
                    &question.text,
                    ReplyMode::Collect,
                    sink,
                )
                .await;
            if let Err(e) = &attempt.outcome {
                warn!(
                    "Queued question of user {} failed again [{}]: {}",
                    question.user_id,
                    e.code(),
                    e
                );
            }
            if !attempt.needs_retry() && self.queue.remove_delivered(&question).await {
                delivered += 1;
            }
        }

        if delivered > 0 {
            info!("Delivered {} queued questions", delivered);
        }
        delivered
    }

    /// Retry queued questions every interval until `shutdown` fires
    pub async fn run_retry_loop(
        self: Arc<Self>,
        sink: Arc<dyn MessageSink>,
        shutdown: watch::Receiver<bool>,
    ) {
        let interval = self.retry_interval;
        queue::run_every(interval, shutdown, || {
            let service = Arc::clone(&self);
            let sink = Arc::clone(&sink);
            async move {
                let evicted = service.limiter.evict_idle().await;
                if evicted > 0 {
                    debug!("Evicted {} idle rate limit windows", evicted);
                }
                service.retry_pending(sink.as_ref()).await;
            }
        })
        .await;
    }

    /// Close every bot's completion client
    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn emit(out: &mut dyn FragmentSink, fragments: &[&str]) -> Result<()> {
    for fragment in fragments {
        out.fragment(fragment).await.map_err(ChatBotError::Other)?;
    }
    Ok(())
}
