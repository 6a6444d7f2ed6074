//! Prompt assembly
//!
//! A prompt is always two messages: the guide as the system message, and a user message
//! holding the guide, the best matching chunks and the question between `###` delimiters.
//! Chunks are added in descending score order for as long as the whole bundle stays within
//! the token budget.

pub mod tokens;


use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embeddings::{EmbeddingIndex, top_n_similarity};
use crate::{ChatBotError, Result};

pub use tokens::TokenCounter;

/// Persona and answering rules sent with every question
pub const DEFAULT_GUIDE: &str = r#"
I want you to act as an AI assistant, adept at analyzing provided text and answering questions based on the given context. When presented with extracted parts of a long document and a question, offer a conversational answer that is accurate and helpful. If the answer cannot be found within the provided context, simply respond with "Hmm, I'm not sure," without adding any speculative or extraneous information. Focus on delivering precise and reliable assistance based on the available information.
here are some rules to follow:
1. action name should be less than 12 characters, and only contain the following characters ".12345abcdefghijklmnopqrstuvwxyz"
for example:
```python
@action("hello")
def hello():
    print('hello')
```
"hello" is less then 12 characters, and only contains characters in ".12345abcdefghijklmnopqrstuvwxyz"
2. reply with the same language of the latest question.

context:
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The system and user messages of one completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub system: String,
    pub user: String,
}

impl PromptBundle {
    #[inline]
    pub fn messages(&self) -> [Message; 2] {
        [
            Message {
                role: Role::System,
                content: self.system.clone(),
            },
            Message {
                role: Role::User,
                content: self.user.clone(),
            },
        ]
    }
}

/// Render the user message for a set of chunks
#[inline]
pub fn compose_user_prompt(guide: &str, chunks: &[&str], question: &str) -> String {
    let content = chunks.join("\n");
    format!("\n{guide}\n###\n{content}\n###\nQuestion: {question}\nAnswer:")
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    counter: TokenCounter,
    search_top_n: usize,
    max_chunks: usize,
    similarity_threshold: f32,
}

impl PromptBuilder {
    #[inline]
    pub fn new(counter: TokenCounter, config: &RetrievalConfig) -> Self {
        Self {
            counter,
            search_top_n: config.search_top_n,
            max_chunks: config.max_chunks,
            similarity_threshold: config.similarity_threshold,
        }
    }

    #[inline]
    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Tokens of the whole bundle, system and user message together
    #[inline]
    pub fn bundle_tokens(&self, bundle: &PromptBundle) -> usize {
        self.counter.count(&bundle.system) + self.counter.count(&bundle.user)
    }

    /// Build the prompt for `question` given its embedding.
    ///
    /// Fails with [`ChatBotError::PromptTooLarge`] when not even the chunk-free prompt
    /// fits in `max_tokens`.
    pub fn build_prompt(
        &self,
        question: &str,
        query_embedding: &[f32],
        index: &EmbeddingIndex,
        guide: &str,
        max_tokens: usize,
    ) -> Result<PromptBundle> {
        let top_n = self.search_top_n.min(index.len());
        let candidates = top_n_similarity(query_embedding, index, top_n)?;

        let mut chunks: Vec<&str> = Vec::with_capacity(self.max_chunks);
        let mut best: Option<(PromptBundle, usize)> = None;

        let relevant = candidates
            .iter()
            .take(self.max_chunks)
            .inspect(|c| debug!("similarity: {:.4}, chunk: {:?}", c.score, preview(&c.chunk)))
            .filter(|c| c.score > self.similarity_threshold);

        // The first candidate carries no chunks at all.
        for next in std::iter::once(None).chain(relevant.map(Some)) {
            if let Some(scored) = next {
                chunks.push(scored.chunk.as_str());
            }

            let candidate = PromptBundle {
                system: guide.to_string(),
                user: compose_user_prompt(guide, &chunks, question),
            };
            let tokens = self.bundle_tokens(&candidate);
            if tokens > max_tokens {
                debug!(
                    "Prompt with {} chunks needs {} tokens, budget is {}",
                    chunks.len(),
                    tokens,
                    max_tokens
                );
                break;
            }
            best = Some((candidate, tokens));
        }

        let (bundle, tokens) = best.ok_or(ChatBotError::PromptTooLarge)?;
        info!("Built prompt with {} tokens", tokens);
        Ok(bundle)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(20).collect()
}
