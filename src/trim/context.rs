//! Boundary-aware truncation of a single text blob

use super::{DEFAULT_LOOKBACK_WINDOW, DEFAULT_TRUNCATION_MARKER};
use crate::tokens::{TokenCounter, TokenEstimator};
use std::sync::Arc;
use tracing::debug;

/// Re-cuts allowed when a non-linear counter overshoots the first cut
const MAX_CUT_ATTEMPTS: usize = 8;

/// Cuts oversized text to a token allowance
pub struct ContextTrimmer {
    counter: Arc<dyn TokenCounter>,
    marker: String,
    lookback_window: usize,
}

impl ContextTrimmer {
    pub fn new(counter: Arc<dyn TokenCounter>, marker: impl Into<String>, lookback_window: usize) -> Self {
        Self {
            counter,
            marker: marker.into(),
            lookback_window,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Returns `(text, was_truncated)`.
    ///
    /// Text within `max_tokens` comes back unchanged. Otherwise the cut lands
    /// on the nearest preceding newline, period, or whitespace inside the
    /// lookback window (raw offset if none), and the marker is appended with
    /// its cost counted in `max_tokens`.
    pub fn trim_context(&self, text: &str, max_tokens: usize) -> (String, bool) {
        let original_tokens = self.counter.count(text);
        if original_tokens <= max_tokens {
            return (text.to_string(), false);
        }

        let marker_tokens = self.counter.count(&self.marker);
        if marker_tokens > max_tokens {
            debug!(max_tokens, marker_tokens, "Truncation marker alone exceeds allowance");
            return (String::new(), true);
        }

        let available = max_tokens - marker_tokens;
        let total_chars = text.chars().count();
        let mut target = ((available as f64) * self.counter.chars_per_token()).floor() as usize;
        target = target.min(total_chars);

        for _ in 0..MAX_CUT_ATTEMPTS {
            let cut = self.find_cut(text, target);
            let candidate = format!("{}{}", &text[..cut], self.marker);
            let tokens = self.counter.count(&candidate);
            if tokens <= max_tokens {
                debug!(original_tokens, tokens, max_tokens, "Truncated context");
                return (candidate, true);
            }
            if target == 0 {
                break;
            }
            target = (target * max_tokens / tokens).min(target - 1);
        }

        (self.marker.clone(), true)
    }

    /// Byte offset to cut at, searching back from `target_chars`
    fn find_cut(&self, text: &str, target_chars: usize) -> usize {
        let byte_at = |chars: usize| {
            text.char_indices()
                .nth(chars)
                .map(|(i, _)| i)
                .unwrap_or(text.len())
        };

        let end = byte_at(target_chars);
        let start = byte_at(target_chars.saturating_sub(self.lookback_window));
        let window = &text[start..end];

        if let Some(pos) = window.rfind('\n') {
            return start + pos;
        }
        if let Some(pos) = window.rfind('.') {
            return start + pos + 1;
        }
        if let Some((pos, _)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            return start + pos;
        }
        end
    }
}

impl Default for ContextTrimmer {
    fn default() -> Self {
        Self::new(
            Arc::new(TokenEstimator::default()),
            DEFAULT_TRUNCATION_MARKER,
            DEFAULT_LOOKBACK_WINDOW,
        )
    }
}
