//! prompt-shaper - Fit agent prompts into per-task token budgets
//!
//! This library sits between an agent and a completion endpoint. It takes
//! unbounded prompt material and produces a bounded message list, avoiding
//! re-sending static content that has not changed between calls.
//!
//! ## Key Features
//!
//! - **Token Estimation**: Cheap character-ratio counts, or cl100k BPE counts
//! - **Task Classification**: Keyword rules mapping a query to a budget label
//! - **Budget Table**: Per-task input/output totals split across prompt sections
//! - **Prompt Cache**: TTL-bound store for static prompt content with hit accounting
//! - **Trimming**: Recency-biased conversation trimming and boundary-aware context cuts
//! - **Metrics Tracking**: Cumulative savings across optimization calls

pub mod api;
pub mod budget;
pub mod cache;
pub mod classify;
pub mod config;
pub mod metrics;
pub mod optimization;
pub mod tokens;
pub mod trim;

pub use api::{Message, OptimizeRequest, Role};
pub use budget::{BudgetRatios, BudgetTable, TokenBudget};
pub use cache::{CacheConfig, CacheStats, PromptCache};
pub use classify::{TaskClassifier, TaskType};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use metrics::{MetricsTracker, TokenMetrics};
pub use optimization::{OptimizationResult, OptimizationStats, OptimizerError, PromptOptimizer};
pub use tokens::{BpeCounter, TokenCounter, TokenEstimator};
pub use trim::{ContextTrimmer, ConversationTrimmer, TrimConfig};
