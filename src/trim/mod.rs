//! Trimming prompt sections to token allowances
//!
//! - [`ConversationTrimmer`]: recency-biased selection over a message list,
//!   consolidating long runs of dropped turns into one marker message
//! - [`ContextTrimmer`]: cuts one text blob at a nearby boundary and appends
//!   a truncation marker that is itself counted against the allowance

mod context;
mod conversation;

pub use context::ContextTrimmer;
pub use conversation::{is_consolidation_marker, ConversationTrim, ConversationTrimmer};

use serde::{Deserialize, Serialize};

/// Default marker appended to truncated text
pub const DEFAULT_TRUNCATION_MARKER: &str = "...[truncated]";

/// Characters searched backward from the cut offset for a boundary
pub const DEFAULT_LOOKBACK_WINDOW: usize = 200;

/// Dropped-message count above which the run is consolidated
pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 10;

/// Prefix identifying a consolidation marker message
pub const CONSOLIDATION_PREFIX: &str = "[consolidated]";

/// Configuration shared by the trimmers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Consolidate when more than this many messages are dropped
    pub consolidation_threshold: usize,
    /// Appended to truncated text
    pub truncation_marker: String,
    /// Boundary search window in characters
    pub lookback_window: usize,
    /// Always keep system-role messages
    pub keep_system: bool,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
            keep_system: true,
        }
    }
}
