//! Cumulative savings telemetry across optimization calls

use crate::classify::TaskType;
use crate::optimization::OptimizationStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Running totals over every recorded optimization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMetrics {
    /// Optimization calls recorded
    pub optimization_count: u64,
    /// Estimated tokens before optimization
    pub original_tokens: u64,
    /// Reported tokens after optimization
    pub optimized_tokens: u64,
    /// Tokens saved through trimming and caching
    pub tokens_saved: u64,
    /// Static-content tokens served from the prompt cache
    pub cache_tokens_saved: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Calls per task type
    pub per_task: HashMap<TaskType, u64>,
}

impl TokenMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: &OptimizationStats) {
        self.optimization_count += 1;
        self.original_tokens += stats.original_tokens as u64;
        self.optimized_tokens += stats.optimized_tokens as u64;
        self.tokens_saved += stats.tokens_saved as u64;
        self.cache_tokens_saved += stats.cache_tokens_saved as u64;
        self.cache_hits += stats.cache_hits as u64;
        self.cache_misses += stats.cache_misses as u64;
        *self.per_task.entry(stats.task_type).or_insert(0) += 1;
    }

    /// Overall `1 - optimized / original`
    pub fn reduction(&self) -> f64 {
        if self.original_tokens == 0 {
            return 0.0;
        }
        1.0 - self.optimized_tokens as f64 / self.original_tokens as f64
    }

    pub fn average_saved_per_call(&self) -> f64 {
        if self.optimization_count == 0 {
            return 0.0;
        }
        self.tokens_saved as f64 / self.optimization_count as f64
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

/// Thread-safe metrics tracker
#[derive(Clone, Default)]
pub struct MetricsTracker {
    inner: Arc<Mutex<TokenMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stats: &OptimizationStats) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(stats);
    }

    pub fn get_metrics(&self) -> TokenMetrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = TokenMetrics::default();
    }

    pub fn summary(&self) -> MetricsSummary {
        let metrics = self.get_metrics();
        MetricsSummary {
            optimization_count: metrics.optimization_count,
            tokens_saved: metrics.tokens_saved,
            cache_tokens_saved: metrics.cache_tokens_saved,
            reduction: metrics.reduction(),
            cache_hit_rate: metrics.cache_hit_rate(),
            avg_saved_per_call: metrics.average_saved_per_call(),
        }
    }
}

impl std::fmt::Debug for MetricsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsTracker")
            .field("metrics", &self.get_metrics())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub optimization_count: u64,
    pub tokens_saved: u64,
    pub cache_tokens_saved: u64,
    pub reduction: f64,
    pub cache_hit_rate: f64,
    pub avg_saved_per_call: f64,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Token Savings Summary ===")?;
        writeln!(f, "Optimizations: {}", self.optimization_count)?;
        writeln!(f, "Tokens saved: {}", self.tokens_saved)?;
        writeln!(f, "  from cache: {}", self.cache_tokens_saved)?;
        writeln!(f, "Reduction: {:.2}%", self.reduction * 100.0)?;
        writeln!(f, "Cache hit rate: {:.1}%", self.cache_hit_rate * 100.0)?;
        writeln!(f, "Avg saved/call: {:.1}", self.avg_saved_per_call)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(task_type: TaskType, original: usize, optimized: usize, hits: u32) -> OptimizationStats {
        let mut stats = OptimizationStats::new(original, optimized);
        stats.task_type = task_type;
        stats.cache_hits = hits;
        stats.cache_misses = 2 - hits;
        stats
    }

    #[test]
    fn test_record_accumulates() {
        let tracker = MetricsTracker::new();
        tracker.record(&stats(TaskType::Review, 1000, 400, 0));
        tracker.record(&stats(TaskType::Review, 1000, 200, 2));
        tracker.record(&stats(TaskType::QuickFix, 0, 0, 1));

        let metrics = tracker.get_metrics();
        assert_eq!(metrics.optimization_count, 3);
        assert_eq!(metrics.tokens_saved, 1400);
        assert_eq!(metrics.per_task[&TaskType::Review], 2);
        assert!((metrics.reduction() - 0.7).abs() < 1e-9);
        assert_eq!(metrics.cache_hit_rate(), 0.5);
    }

    #[test]
    fn test_empty_summary() {
        let summary = MetricsTracker::new().summary();
        assert_eq!(summary.optimization_count, 0);
        assert_eq!(summary.reduction, 0.0);
        assert_eq!(summary.avg_saved_per_call, 0.0);
    }

    #[test]
    fn test_reset() {
        let tracker = MetricsTracker::new();
        tracker.record(&stats(TaskType::Default, 10, 5, 1));
        tracker.reset();
        assert_eq!(tracker.get_metrics().optimization_count, 0);
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = MetricsTracker::new();
        let clone = tracker.clone();
        clone.record(&stats(TaskType::Default, 10, 5, 1));
        assert_eq!(tracker.get_metrics().optimization_count, 1);
    }
}
