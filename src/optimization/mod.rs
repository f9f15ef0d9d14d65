//! Request shaping: budget selection, cache resolution, and trimming
//!
//! [`PromptOptimizer`] turns raw prompt material into a bounded message list
//! and reports what it saved.

mod optimizer;

pub use optimizer::PromptOptimizer;

use crate::api::Message;
use crate::budget::{BudgetError, TokenBudget};
use crate::cache::CacheError;
use crate::classify::TaskType;
use crate::tokens::TokenizerError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Invalid budget table: {0}")]
    Budget(#[from] BudgetError),

    #[error("Invalid cache configuration: {0}")]
    Cache(#[from] CacheError),

    #[error("Token counter unavailable: {0}")]
    Tokenizer(#[from] TokenizerError),
}

/// Estimated size of one prompt section before and after optimization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionStats {
    pub original_tokens: usize,
    /// Reported size; a cache hit reports its reference marker here
    pub final_tokens: usize,
}

impl SectionStats {
    pub fn new(original_tokens: usize, final_tokens: usize) -> Self {
        Self {
            original_tokens,
            final_tokens,
        }
    }

    pub fn saved(&self) -> usize {
        self.original_tokens.saturating_sub(self.final_tokens)
    }
}

/// Statistics about one optimization call
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationStats {
    pub task_type: TaskType,
    pub system: SectionStats,
    pub persona: SectionStats,
    pub conversation: SectionStats,
    pub context: SectionStats,
    pub query: SectionStats,
    pub cache_hits: u32,
    pub cache_misses: u32,
    /// Static-content tokens whose re-specification was avoided
    pub cache_tokens_saved: usize,
    /// Conversation turns dropped or consolidated
    pub messages_omitted: usize,
    pub original_tokens: usize,
    pub optimized_tokens: usize,
    pub tokens_saved: usize,
    /// `1 - optimized / original`, 0 for an empty request
    pub reduction: f64,
    pub actions_applied: Vec<String>,
}

impl OptimizationStats {
    pub fn new(original: usize, optimized: usize) -> Self {
        let saved = original.saturating_sub(optimized);
        let reduction = if original > 0 {
            1.0 - optimized as f64 / original as f64
        } else {
            0.0
        };

        Self {
            original_tokens: original,
            optimized_tokens: optimized,
            tokens_saved: saved,
            reduction,
            ..Default::default()
        }
    }

    pub fn sections(&self) -> [(&'static str, SectionStats); 5] {
        [
            ("system", self.system),
            ("persona", self.persona),
            ("conversation", self.conversation),
            ("context", self.context),
            ("query", self.query),
        ]
    }
}

impl std::fmt::Display for OptimizationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Optimization Stats ({}) ===", self.task_type)?;
        for (name, section) in self.sections() {
            writeln!(
                f,
                "{:<13} {:>8} -> {:>8}",
                name, section.original_tokens, section.final_tokens
            )?;
        }
        writeln!(f, "Cache hits/misses: {}/{}", self.cache_hits, self.cache_misses)?;
        writeln!(f, "Original tokens: ~{}", self.original_tokens)?;
        writeln!(f, "Optimized tokens: ~{}", self.optimized_tokens)?;
        writeln!(f, "Tokens saved: ~{}", self.tokens_saved)?;
        writeln!(f, "Reduction: {:.1}%", self.reduction * 100.0)?;
        if !self.actions_applied.is_empty() {
            writeln!(f, "Applied: {}", self.actions_applied.join(", "))?;
        }
        Ok(())
    }
}

/// Output of [`PromptOptimizer::optimize`]
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub messages: Vec<Message>,
    pub budget_used: TokenBudget,
    pub stats: OptimizationStats,
}
