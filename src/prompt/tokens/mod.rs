#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::{Context, Result};
use tiktoken_rs::CoreBPE;

/// BPE token counter for a chat model
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter {
    /// Tokenizer of `model`, or cl100k when the model is unknown
    #[inline]
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => tiktoken_rs::cl100k_base().context("Failed to load cl100k tokenizer")?,
        };
        Ok(Self { bpe: Arc::new(bpe) })
    }

    #[inline]
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}
