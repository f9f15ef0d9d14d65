//! Optimizer orchestration

use super::{OptimizationResult, OptimizationStats, OptimizerError, SectionStats};
use crate::api::{compose_user_turn, Message, OptimizeRequest};
use crate::budget::{BudgetTable, TokenBudget};
use crate::cache::{CacheConfig, PromptCache};
use crate::classify::{TaskClassifier, TaskType};
use crate::config::{Config, CounterBackend};
use crate::metrics::MetricsTracker;
use crate::tokens::{BpeCounter, TokenCounter, TokenEstimator};
use crate::trim::{ContextTrimmer, ConversationTrimmer, TrimConfig};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT_KEY: &str = "system_prompt";
const PERSONA_KEY: &str = "persona";

/// Framing added around context in the final user turn
const CONTEXT_FRAME: &str = "Context:\n\n\n";

/// How a static section was resolved against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheOutcome {
    Hit,
    Miss,
    /// Empty section, nothing to cache
    Skipped,
}

/// Shapes raw prompt material into a budgeted message list
pub struct PromptOptimizer {
    counter: Arc<dyn TokenCounter>,
    classifier: TaskClassifier,
    budgets: BudgetTable,
    cache: Option<Arc<PromptCache>>,
    conversation: ConversationTrimmer,
    context: ContextTrimmer,
    keep_system: bool,
    metrics: MetricsTracker,
}

impl PromptOptimizer {
    /// Optimizer with default settings and its own cache
    pub fn new() -> Self {
        let counter: Arc<dyn TokenCounter> = Arc::new(TokenEstimator::default());
        let trim = TrimConfig::default();
        Self {
            classifier: TaskClassifier::default(),
            budgets: BudgetTable::default(),
            cache: Some(Arc::new(PromptCache::default())),
            conversation: ConversationTrimmer::new(counter.clone(), trim.consolidation_threshold),
            context: ContextTrimmer::new(counter.clone(), trim.truncation_marker, trim.lookback_window),
            keep_system: trim.keep_system,
            metrics: MetricsTracker::new(),
            counter,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, OptimizerError> {
        let counter: Arc<dyn TokenCounter> = match config.estimator.backend {
            CounterBackend::Chars => Arc::new(
                TokenEstimator::new(config.estimator.chars_per_token)?
                    .with_message_overhead(config.estimator.message_overhead),
            ),
            CounterBackend::Cl100k => Arc::new(BpeCounter::cl100k()?),
        };

        let budgets = BudgetTable::new(config.budgets.ratios)?.with_label_overrides(
            config
                .budgets
                .overrides
                .iter()
                .map(|(label, o)| (label.as_str(), o.total_input, o.total_output)),
        )?;

        let cache = if config.cache.enabled {
            let cache_config = CacheConfig {
                ttl: Duration::from_secs(config.cache.ttl_secs),
                max_entries: config.cache.max_entries,
            };
            Some(Arc::new(PromptCache::new(cache_config, counter.clone())?))
        } else {
            None
        };

        let trim = &config.trimming;
        Ok(Self {
            classifier: TaskClassifier::default(),
            budgets,
            cache,
            conversation: ConversationTrimmer::new(counter.clone(), trim.consolidation_threshold),
            context: ContextTrimmer::new(
                counter.clone(),
                trim.truncation_marker.clone(),
                trim.lookback_window,
            ),
            keep_system: trim.keep_system,
            metrics: MetricsTracker::new(),
            counter,
        })
    }

    /// Share a cache with other optimizers or sessions
    pub fn with_cache(mut self, cache: Arc<PromptCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run without a cache; every static lookup is a miss
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_budgets(mut self, budgets: BudgetTable) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_classifier(mut self, classifier: TaskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(&self) -> Option<&Arc<PromptCache>> {
        self.cache.as_ref()
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn budgets(&self) -> &BudgetTable {
        &self.budgets
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Optimize a request, classifying it when no valid task label is given
    pub fn optimize_request(&self, request: &OptimizeRequest) -> OptimizationResult {
        let task_type = self
            .classifier
            .classify(&request.user_query, request.task_type.as_deref());
        self.run(
            task_type,
            &request.system_prompt,
            &request.persona,
            &request.conversation_history,
            &request.code_context,
            &request.user_query,
        )
    }

    /// Shape prompt material into a budgeted message list.
    ///
    /// `task_type` selects the budget; `None` classifies `user_query`.
    pub fn optimize(
        &self,
        system_prompt: &str,
        persona: &str,
        conversation_history: &[Message],
        code_context: &str,
        user_query: &str,
        task_type: Option<TaskType>,
    ) -> OptimizationResult {
        let task_type = task_type.unwrap_or_else(|| self.classifier.classify(user_query, None));
        self.run(
            task_type,
            system_prompt,
            persona,
            conversation_history,
            code_context,
            user_query,
        )
    }

    fn run(
        &self,
        task_type: TaskType,
        system_prompt: &str,
        persona: &str,
        history: &[Message],
        code_context: &str,
        user_query: &str,
    ) -> OptimizationResult {
        let budget = self.budgets.get_budget(task_type);
        debug!(
            task = %task_type,
            total_input = budget.total_input,
            "Selected token budget"
        );

        let overhead = self.counter.message_overhead();
        let mut stats = OptimizationStats {
            task_type,
            ..Default::default()
        };

        // Static sections: cache resolution, then fit to the system allowance
        let system_outcome = self.resolve_static(SYSTEM_PROMPT_KEY, system_prompt);
        let persona_outcome = self.resolve_static(PERSONA_KEY, persona);
        for outcome in [system_outcome, persona_outcome] {
            match outcome {
                CacheOutcome::Hit => stats.cache_hits += 1,
                CacheOutcome::Miss => stats.cache_misses += 1,
                CacheOutcome::Skipped => {}
            }
        }

        let static_count = [system_prompt, persona].iter().filter(|s| !s.is_empty()).count();
        let mut system_allowance = budget.system.saturating_sub(static_count * overhead);

        let (system_sent, system_cut) = self.fit_section(system_prompt, system_allowance);
        system_allowance = system_allowance.saturating_sub(self.counter.count(&system_sent));
        let (persona_sent, persona_cut) = self.fit_section(persona, system_allowance);
        if system_cut || persona_cut {
            warn!(
                task = %task_type,
                allowance = budget.system,
                "Static prompt exceeds system allocation, truncating"
            );
            stats.actions_applied.push("truncate_system".to_string());
        }

        stats.system = self.static_section_stats(
            SYSTEM_PROMPT_KEY,
            system_prompt,
            &system_sent,
            system_outcome,
            &mut stats.cache_tokens_saved,
        );
        stats.persona = self.static_section_stats(
            PERSONA_KEY,
            persona,
            &persona_sent,
            persona_outcome,
            &mut stats.cache_tokens_saved,
        );

        // Conversation
        let conversation = self
            .conversation
            .trim_detailed(history, budget.conversation, self.keep_system);
        stats.conversation = SectionStats::new(
            self.counter.count_messages(history),
            self.counter.count_messages(&conversation.messages),
        );
        stats.messages_omitted = conversation.omitted;
        if conversation.consolidated {
            stats.actions_applied.push("consolidate_conversation".to_string());
        } else if conversation.omitted > 0 {
            stats.actions_applied.push("drop_conversation".to_string());
        }

        // Context, with room for its framing in the user turn
        let context_allowance = if code_context.is_empty() {
            budget.context
        } else {
            budget.context.saturating_sub(self.counter.count(CONTEXT_FRAME))
        };
        let (context_sent, context_cut) = self.context.trim_context(code_context, context_allowance);
        if context_cut {
            stats.actions_applied.push("truncate_context".to_string());
        }
        stats.context = SectionStats::new(
            self.counter.count(code_context),
            self.counter.count(&context_sent),
        );

        // Query is only cut when it alone overflows; the user turn overhead is charged here
        let query_allowance = budget.query.saturating_sub(overhead);
        let (query_sent, query_cut) = if self.counter.count(user_query) > query_allowance {
            self.context.trim_context(user_query, query_allowance)
        } else {
            (user_query.to_string(), false)
        };
        if query_cut {
            stats.actions_applied.push("truncate_query".to_string());
        }
        stats.query = SectionStats::new(
            self.counter.count(user_query),
            self.counter.count(&query_sent),
        );

        // Assemble
        let mut messages = Vec::with_capacity(conversation.messages.len() + 3);
        if !system_sent.is_empty() {
            messages.push(Message::system(system_sent));
        }
        if !persona_sent.is_empty() {
            messages.push(Message::system(persona_sent));
        }
        messages.extend(conversation.messages);
        messages.push(Message::user(compose_user_turn(&context_sent, &query_sent)));

        let sections = stats.sections();
        let original: usize = sections.iter().map(|(_, s)| s.original_tokens).sum();
        let optimized: usize = sections.iter().map(|(_, s)| s.final_tokens).sum();
        let totals = OptimizationStats::new(original, optimized);
        stats.original_tokens = totals.original_tokens;
        stats.optimized_tokens = totals.optimized_tokens;
        stats.tokens_saved = totals.tokens_saved;
        stats.reduction = totals.reduction;

        debug!(
            task = %task_type,
            original,
            optimized,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            "Optimized request"
        );
        self.metrics.record(&stats);

        OptimizationResult {
            messages,
            budget_used: budget,
            stats,
        }
    }

    /// Look up static content, registering it on a miss
    fn resolve_static(&self, name: &str, content: &str) -> CacheOutcome {
        if content.is_empty() {
            return CacheOutcome::Skipped;
        }

        let Some(cache) = &self.cache else {
            debug!(section = name, "No prompt cache configured, treating as miss");
            return CacheOutcome::Miss;
        };

        let key = cache_key(name, content);
        match cache.get(&key) {
            Some(cached) if cached == content => {
                debug!(section = name, key = %key, "Static content cache hit");
                CacheOutcome::Hit
            }
            _ => {
                if let Err(e) = cache.register(&key, content) {
                    warn!(section = name, error = %e, "Failed to cache static content");
                }
                CacheOutcome::Miss
            }
        }
    }

    /// Truncate static text only when it exceeds `allowance`
    fn fit_section(&self, text: &str, allowance: usize) -> (String, bool) {
        if self.counter.count(text) <= allowance {
            return (text.to_string(), false);
        }
        self.context.trim_context(text, allowance)
    }

    /// A hit reports the reference marker size instead of the sent text
    fn static_section_stats(
        &self,
        name: &str,
        original: &str,
        sent: &str,
        outcome: CacheOutcome,
        cache_tokens_saved: &mut usize,
    ) -> SectionStats {
        let original_tokens = self.counter.count(original);
        let final_tokens = match outcome {
            CacheOutcome::Hit => {
                let reference = self.counter.count(&reference_marker(name));
                *cache_tokens_saved += self.counter.count(sent).saturating_sub(reference);
                reference
            }
            CacheOutcome::Miss | CacheOutcome::Skipped => self.counter.count(sent),
        };
        SectionStats::new(original_tokens, final_tokens)
    }

    /// Budget this optimizer would apply to `task_type`
    pub fn budget_for(&self, task_type: TaskType) -> TokenBudget {
        self.budgets.get_budget(task_type)
    }
}

impl Default for PromptOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PromptOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptOptimizer")
            .field("counter", &self.counter.name())
            .field("budgets", &self.budgets)
            .field("cache", &self.cache)
            .field("keep_system", &self.keep_system)
            .finish()
    }
}

/// Stable per-process key for a static section's content
fn cache_key(name: &str, content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{}:{:016x}", name, hasher.finish())
}

fn reference_marker(name: &str) -> String {
    format!("[cached:{}]", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::trim::is_consolidation_marker;

    const SYSTEM: &str = "You are a careful coding agent. Follow the repository conventions.";
    const PERSONA: &str = "Terse and precise, no speculation.";

    fn history(turns: usize, chars: usize) -> Vec<Message> {
        (0..turns)
            .map(|i| {
                let content = format!("{:04}", i) + &"h".repeat(chars.saturating_sub(4));
                if i % 2 == 0 {
                    Message::user(content)
                } else {
                    Message::assistant(content)
                }
            })
            .collect()
    }

    #[test]
    fn test_second_call_hits_cache() {
        let optimizer = PromptOptimizer::new();

        let first = optimizer.optimize(SYSTEM, PERSONA, &[], "", "review this diff", None);
        assert_eq!(first.stats.cache_hits, 0);
        assert_eq!(first.stats.cache_misses, 2);

        let second = optimizer.optimize(SYSTEM, PERSONA, &[], "", "review this diff", None);
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.stats.cache_misses, 0);
        assert!(second.stats.cache_tokens_saved > 0);
        assert!(second.stats.system.final_tokens < second.stats.system.original_tokens);

        // Content on the wire is unchanged by a hit
        assert_eq!(first.messages, second.messages);
    }

    #[test]
    fn test_changed_system_prompt_misses() {
        let optimizer = PromptOptimizer::new();
        optimizer.optimize(SYSTEM, PERSONA, &[], "", "q", None);

        let result = optimizer.optimize("A different prompt.", PERSONA, &[], "", "q", None);
        assert_eq!(result.stats.cache_hits, 1);
        assert_eq!(result.stats.cache_misses, 1);
    }

    #[test]
    fn test_without_cache_always_misses() {
        let optimizer = PromptOptimizer::new().without_cache();
        for _ in 0..3 {
            let result = optimizer.optimize(SYSTEM, PERSONA, &[], "", "q", None);
            assert_eq!(result.stats.cache_hits, 0);
            assert_eq!(result.stats.cache_misses, 2);
        }
    }

    #[test]
    fn test_shared_cache_across_optimizers() {
        let cache = Arc::new(PromptCache::default());
        let a = PromptOptimizer::new().with_cache(cache.clone());
        let b = PromptOptimizer::new().with_cache(cache.clone());

        a.optimize(SYSTEM, PERSONA, &[], "", "q", None);
        let result = b.optimize(SYSTEM, PERSONA, &[], "", "q", None);
        assert_eq!(result.stats.cache_hits, 2);
        assert_eq!(cache.get_stats().total_entries, 2);
    }

    #[test]
    fn test_message_layout() {
        let optimizer = PromptOptimizer::new();
        let conversation = vec![Message::user("earlier question"), Message::assistant("earlier answer")];

        let result = optimizer.optimize(
            SYSTEM,
            PERSONA,
            &conversation,
            "fn parse() {}",
            "Fix the parser crash",
            None,
        );

        assert_eq!(result.budget_used.task_type, TaskType::QuickFix);
        assert_eq!(result.messages.len(), 5);
        assert_eq!(result.messages[0], Message::system(SYSTEM));
        assert_eq!(result.messages[1], Message::system(PERSONA));
        assert_eq!(&result.messages[2..4], &conversation[..]);
        assert_eq!(
            result.messages[4],
            Message::user("Context:\nfn parse() {}\n\nFix the parser crash")
        );
        assert!(result.stats.actions_applied.is_empty());
    }

    #[test]
    fn test_empty_static_sections_skipped() {
        let optimizer = PromptOptimizer::new();
        let result = optimizer.optimize("", "", &[], "", "hello", None);

        assert_eq!(result.messages, vec![Message::user("hello")]);
        assert_eq!(result.stats.cache_hits, 0);
        assert_eq!(result.stats.cache_misses, 0);
        assert_eq!(result.budget_used.task_type, TaskType::Default);
    }

    #[test]
    fn test_explicit_task_type_wins() {
        let optimizer = PromptOptimizer::new();
        let result = optimizer.optimize("", "", &[], "", "Fix the bug", Some(TaskType::Coordinate));
        assert_eq!(result.budget_used.total_input, 128_000);
        assert_eq!(result.stats.task_type, TaskType::Coordinate);
    }

    #[test]
    fn test_request_hint_handling() {
        let optimizer = PromptOptimizer::new();

        let hinted = OptimizeRequest::new("Fix the bug").with_task_type("review");
        assert_eq!(optimizer.optimize_request(&hinted).budget_used.task_type, TaskType::Review);

        let blank = OptimizeRequest::new("Fix the bug").with_task_type("");
        assert_eq!(optimizer.optimize_request(&blank).budget_used.task_type, TaskType::QuickFix);

        let none = OptimizeRequest::new("say hello");
        assert_eq!(optimizer.optimize_request(&none).budget_used.task_type, TaskType::Default);
    }

    #[test]
    fn test_budget_respected_for_every_task_type() {
        let optimizer = PromptOptimizer::new();
        let system = "s".repeat(200_000);
        let persona = "p".repeat(200_000);
        let conversation = history(400, 3_000);
        let context = "let x = 1;\n".repeat(100_000);
        let query = "q".repeat(400_000);

        for task in TaskType::ALL {
            let result = optimizer.optimize(&system, &persona, &conversation, &context, &query, Some(task));
            let used = optimizer.counter().count_messages(&result.messages);
            assert!(
                used <= result.budget_used.total_input,
                "{}: {} > {}",
                task,
                used,
                result.budget_used.total_input
            );
            assert!(result.stats.reduction > 0.0);
        }
    }

    #[test]
    fn test_long_history_consolidated() {
        let optimizer = PromptOptimizer::new();
        let conversation = history(200, 800);

        let result = optimizer.optimize("", "", &conversation, "", "review", Some(TaskType::Review));

        assert!(result.messages.iter().any(is_consolidation_marker));
        assert!(result.stats.messages_omitted > 10);
        assert!(result
            .stats
            .actions_applied
            .contains(&"consolidate_conversation".to_string()));
        assert!(result.stats.conversation.final_tokens <= result.budget_used.conversation);
        assert_eq!(result.messages.last().map(|m| m.content.as_str()), Some("review"));
    }

    #[test]
    fn test_large_context_truncated() {
        let optimizer = PromptOptimizer::new();
        let context = "x".repeat(200_000);

        let result = optimizer.optimize("", "", &[], &context, "add a flag", None);
        assert_eq!(result.budget_used.task_type, TaskType::Implement);
        assert!(result.stats.context.final_tokens <= result.budget_used.context);
        assert!(result.stats.actions_applied.contains(&"truncate_context".to_string()));
        assert!(result.messages[0].content.contains("...[truncated]"));
    }

    #[test]
    fn test_query_kept_whole_when_within_allocation() {
        let optimizer = PromptOptimizer::new();
        let query = format!("Review: {}", "y".repeat(2_000));

        let result = optimizer.optimize("", "", &[], "", &query, None);
        assert_eq!(result.messages[0].content, query);
        assert_eq!(result.stats.query.original_tokens, result.stats.query.final_tokens);
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = MetricsTracker::new();
        let optimizer = PromptOptimizer::new().with_metrics(metrics.clone());

        optimizer.optimize(SYSTEM, PERSONA, &[], "", "q", None);
        optimizer.optimize(SYSTEM, PERSONA, &[], "", "q", None);

        let totals = metrics.get_metrics();
        assert_eq!(totals.optimization_count, 2);
        assert_eq!(totals.cache_hits, 2);
        assert_eq!(totals.cache_misses, 2);
    }

    #[test]
    fn test_from_config() {
        let config = ConfigBuilder::new()
            .cache_enabled(false)
            .budget_override("review", 1_000, 100)
            .truncation_marker("<cut>")
            .build();
        let optimizer = PromptOptimizer::from_config(&config).unwrap();

        assert!(optimizer.cache().is_none());
        assert_eq!(optimizer.budget_for(TaskType::Review).total_input, 1_000);

        let result = optimizer.optimize("", "", &[], &"c".repeat(10_000), "q", Some(TaskType::Review));
        assert!(result.messages[0].content.contains("<cut>"));
    }

    #[test]
    fn test_from_config_rejects_bad_ratio() {
        let config = ConfigBuilder::new().chars_per_token(-1.0).build();
        assert!(matches!(
            PromptOptimizer::from_config(&config),
            Err(OptimizerError::Tokenizer(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_optimizations() {
        let optimizer = Arc::new(PromptOptimizer::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let optimizer = Arc::clone(&optimizer);
                tokio::task::spawn_blocking(move || {
                    optimizer.optimize(
                        SYSTEM,
                        PERSONA,
                        &history(30, 400),
                        "ctx",
                        &format!("review change {}", i),
                        None,
                    )
                })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.stats.cache_hits + result.stats.cache_misses, 2);
            assert_eq!(result.messages[0], Message::system(SYSTEM));
        }

        let cache = optimizer.cache().unwrap();
        assert_eq!(cache.get_stats().total_entries, 2);
        assert_eq!(optimizer.metrics().get_metrics().optimization_count, 8);
    }
}
