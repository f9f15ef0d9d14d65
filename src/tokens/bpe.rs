//! BPE-backed counter using the cl100k_base vocabulary

use super::{TokenCounter, TokenizerError, DEFAULT_CHARS_PER_TOKEN, DEFAULT_MESSAGE_OVERHEAD};
use tiktoken_rs::CoreBPE;

/// Counts tokens with a real BPE vocabulary.
///
/// Slower than [`super::TokenEstimator`], but tracks model tokenizers closely
/// for code and non-English text where the 4:1 ratio drifts.
pub struct BpeCounter {
    bpe: CoreBPE,
    chars_per_token: f64,
}

impl BpeCounter {
    pub fn cl100k() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| TokenizerError::Bpe(e.to_string()))?;
        Ok(Self {
            bpe,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        })
    }
}

impl std::fmt::Debug for BpeCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeCounter")
            .field("vocabulary", &"cl100k_base")
            .finish()
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn message_overhead(&self) -> usize {
        DEFAULT_MESSAGE_OVERHEAD
    }

    fn name(&self) -> &str {
        "cl100k_base"
    }
}
