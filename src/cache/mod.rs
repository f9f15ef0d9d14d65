//! Prompt cache for static prompt material
//!
//! Static system and persona text is usually identical across consecutive
//! calls. The [`PromptCache`] remembers it under caller-chosen keys so that a
//! repeat call can skip re-formatting it and report the avoided cost.
//!
//! ## Semantics
//!
//! 1. **Keyed, not content-addressed**: the caller picks keys; re-registering a
//!    key with new content replaces the entry and resets its age
//! 2. **TTL expiry**: entries expire `ttl` after registration; expired entries
//!    are a miss and are removed lazily on lookup or by [`PromptCache::cleanup_expired`]
//! 3. **Savings accounting**: every hit adds the entry's estimated tokens to
//!    `tokens_saved`
//! 4. **Single lock**: one mutex guards entries and counters; token estimation
//!    happens before the lock is taken

mod store;
mod tracker;

pub use store::{CacheEntry, PromptCache};
pub use tracker::{CacheMetrics, CacheStats};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default entry lifetime (1 hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default capacity
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache key must not be empty")]
    EmptyKey,

    #[error("TTL of {0:?} overflows the clock")]
    TtlOverflow(Duration),

    #[error("Cache capacity must be at least 1")]
    ZeroCapacity,
}

/// Configuration for the prompt cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a registered entry
    pub ttl: Duration,
    /// Maximum live entries before eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}
