//! Recency-biased conversation trimming

use super::{CONSOLIDATION_PREFIX, DEFAULT_CONSOLIDATION_THRESHOLD};
use crate::api::{Message, Role};
use crate::tokens::{TokenCounter, TokenEstimator};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a conversation trim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTrim {
    pub messages: Vec<Message>,
    /// Non-system messages that did not survive
    pub omitted: usize,
    /// Whether the omitted run was replaced by a marker message
    pub consolidated: bool,
}

/// Whether `message` is a marker produced by consolidation
pub fn is_consolidation_marker(message: &Message) -> bool {
    message.role == Role::System && message.content.starts_with(CONSOLIDATION_PREFIX)
}

fn consolidation_marker(omitted: usize) -> Message {
    Message::system(format!(
        "{} {} earlier messages omitted",
        CONSOLIDATION_PREFIX, omitted
    ))
}

/// Fits a message sequence into a token allowance, keeping the newest turns
pub struct ConversationTrimmer {
    counter: Arc<dyn TokenCounter>,
    consolidation_threshold: usize,
}

impl ConversationTrimmer {
    pub fn new(counter: Arc<dyn TokenCounter>, consolidation_threshold: usize) -> Self {
        Self {
            counter,
            consolidation_threshold,
        }
    }

    pub fn trim(&self, messages: &[Message], max_tokens: usize, keep_system: bool) -> Vec<Message> {
        self.trim_detailed(messages, max_tokens, keep_system).messages
    }

    /// Trim and report what was dropped.
    ///
    /// System messages (when kept) are always retained in original order and
    /// placed first, even if they alone exceed `max_tokens`. Remaining turns
    /// are taken newest-first until the next older one would not fit.
    pub fn trim_detailed(
        &self,
        messages: &[Message],
        max_tokens: usize,
        keep_system: bool,
    ) -> ConversationTrim {
        let (system, others): (Vec<&Message>, Vec<&Message>) = if keep_system {
            messages.iter().partition(|m| m.is_system())
        } else {
            (Vec::new(), messages.iter().collect())
        };

        let system_cost: usize = system.iter().map(|m| self.counter.count_message(m)).sum();
        if system_cost > max_tokens {
            debug!(system_cost, max_tokens, "System messages exceed conversation allowance");
        }
        let remaining = max_tokens.saturating_sub(system_cost);

        let costs: Vec<usize> = others.iter().map(|m| self.counter.count_message(m)).collect();
        let mut used = 0;
        let mut start = others.len();
        for (i, cost) in costs.iter().enumerate().rev() {
            if used + cost > remaining {
                break;
            }
            used += cost;
            start = i;
        }

        // The marker has to fit too; give up the oldest survivors for it,
        // but never the newest one. Without room, the marker is skipped.
        let mut marker = None;
        if start > self.consolidation_threshold {
            let (mut trial_start, mut trial_used) = (start, used);
            loop {
                let candidate = consolidation_marker(trial_start);
                if trial_used + self.counter.count_message(&candidate) <= remaining {
                    start = trial_start;
                    marker = Some(candidate);
                    break;
                }
                if others.len() - trial_start <= 1 {
                    break;
                }
                trial_used -= costs[trial_start];
                trial_start += 1;
            }
        }

        let omitted = start;
        let consolidated = marker.is_some();
        if omitted > 0 {
            debug!(omitted, consolidated, kept = others.len() - start, "Trimmed conversation");
        }

        let mut trimmed = Vec::with_capacity(system.len() + 1 + others.len() - start);
        trimmed.extend(system.into_iter().cloned());
        trimmed.extend(marker);
        trimmed.extend(others[start..].iter().map(|m| (*m).clone()));

        ConversationTrim {
            messages: trimmed,
            omitted,
            consolidated,
        }
    }
}

impl Default for ConversationTrimmer {
    fn default() -> Self {
        Self::new(
            Arc::new(TokenEstimator::default()),
            DEFAULT_CONSOLIDATION_THRESHOLD,
        )
    }
}
