//! Hit/miss accounting for the prompt cache

use serde::{Deserialize, Serialize};

/// Running counters for cache performance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Successful lookups
    pub cache_hits: u64,
    /// Lookups that found nothing live
    pub cache_misses: u64,
    /// New or replaced entries
    pub cache_writes: u64,
    /// Sum of estimated tokens over every hit
    pub tokens_saved: u64,
}

impl CacheMetrics {
    pub fn record_hit(&mut self, tokens: usize) {
        self.cache_hits += 1;
        self.tokens_saved += tokens as u64;
    }

    pub fn record_miss(&mut self) {
        self.cache_misses += 1;
    }

    pub fn record_write(&mut self) {
        self.cache_writes += 1;
    }

    /// `hits / (hits + misses)`, 0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total > 0 {
            self.cache_hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Snapshot returned by [`super::PromptCache::get_stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_rate: f64,
    pub tokens_saved: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStats {
    pub(crate) fn from_metrics(total_entries: usize, metrics: &CacheMetrics) -> Self {
        Self {
            total_entries,
            hit_rate: metrics.hit_rate(),
            tokens_saved: metrics.tokens_saved,
            hits: metrics.cache_hits,
            misses: metrics.cache_misses,
            writes: metrics.cache_writes,
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Prompt Cache ===")?;
        writeln!(f, "Live entries: {}", self.total_entries)?;
        writeln!(f, "Hits: {}", self.hits)?;
        writeln!(f, "Misses: {}", self.misses)?;
        writeln!(f, "Hit rate: {:.1}%", self.hit_rate * 100.0)?;
        writeln!(f, "Writes: {}", self.writes)?;
        writeln!(f, "Tokens saved: {}", self.tokens_saved)?;
        Ok(())
    }
}
