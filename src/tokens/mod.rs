//! Token estimation
//!
//! Budgets are enforced against approximate counts. The default
//! [`TokenEstimator`] uses a fixed characters-per-token ratio and never needs
//! model access; [`BpeCounter`] is available when closer counts matter.

mod bpe;

pub use bpe::BpeCounter;

use crate::api::Message;
use thiserror::Error;

/// Default characters per token (~4 for English text and code)
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Tokens added per message for role and formatting structure
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Invalid chars-per-token ratio: {0}")]
    InvalidRatio(f64),

    #[error("Failed to load BPE ranks: {0}")]
    Bpe(String),
}

/// Something that can count tokens in text
pub trait TokenCounter: Send + Sync {
    /// Approximate token count of `text`. Must be 0 for the empty string.
    fn count(&self, text: &str) -> usize;

    /// Average characters per token, used to turn a token allowance into a
    /// character offset when cutting text.
    fn chars_per_token(&self) -> f64;

    /// Structural tokens added per message
    fn message_overhead(&self) -> usize {
        DEFAULT_MESSAGE_OVERHEAD
    }

    /// Counter name for logging
    fn name(&self) -> &str;

    /// Estimated cost of one message including its overhead
    fn count_message(&self, message: &Message) -> usize {
        self.count(&message.content) + self.message_overhead()
    }

    /// Estimated cost of a message sequence
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Character-ratio token estimator
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    chars_per_token: f64,
    message_overhead: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: f64) -> Result<Self, TokenizerError> {
        if !chars_per_token.is_finite() || chars_per_token <= 0.0 {
            return Err(TokenizerError::InvalidRatio(chars_per_token));
        }
        Ok(Self {
            chars_per_token,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        })
    }

    pub fn with_message_overhead(mut self, overhead: usize) -> Self {
        self.message_overhead = overhead;
        self
    }

    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        self.count_messages(messages)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }
}

impl TokenCounter for TokenEstimator {
    fn count(&self, text: &str) -> usize {
        self.estimate(text)
    }

    fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn message_overhead(&self) -> usize {
        self.message_overhead
    }

    fn name(&self) -> &str {
        "char_ratio"
    }
}

/// Estimate tokens with the default ratio
pub fn estimate(text: &str) -> usize {
    TokenEstimator::default().estimate(text)
}

/// Estimate a message sequence with the default ratio and overhead
pub fn estimate_messages(messages: &[Message]) -> usize {
    TokenEstimator::default().estimate_messages(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
        assert_eq!(estimate(&"x".repeat(800)), 200);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        // 4 chars, 8 bytes
        assert_eq!(estimate("éééé"), 1);
    }

    #[test]
    fn test_custom_ratio() {
        let estimator = TokenEstimator::new(2.0).unwrap();
        assert_eq!(estimator.estimate("abcdef"), 3);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        assert!(TokenEstimator::new(0.0).is_err());
        assert!(TokenEstimator::new(-1.0).is_err());
        assert!(TokenEstimator::new(f64::NAN).is_err());
    }

    #[test]
    fn test_messages_include_overhead() {
        let messages = vec![
            Message::new(Role::User, "x".repeat(40)),
            Message::new(Role::Assistant, ""),
        ];
        assert_eq!(estimate_messages(&messages), 10 + 2 * DEFAULT_MESSAGE_OVERHEAD);
        assert_eq!(estimate_messages(&[]), 0);
    }
}
