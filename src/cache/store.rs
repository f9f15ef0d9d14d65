//! Keyed TTL store for static prompt content

use super::tracker::{CacheMetrics, CacheStats};
use super::{CacheConfig, CacheError};
use crate::tokens::{TokenCounter, TokenEstimator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A live piece of cached static content
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub content: String,
    pub estimated_tokens: usize,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub hit_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(key: &str, content: &str, estimated_tokens: usize, now: Instant, expires_at: Instant) -> Self {
        Self {
            key: key.to_string(),
            content: content.to_string(),
            estimated_tokens,
            created_at: now,
            expires_at,
            hit_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    metrics: CacheMetrics,
}

/// Thread-safe prompt cache.
///
/// Constructed and owned by the caller; share it with `Arc` across
/// optimizers or sessions that should see the same hits.
pub struct PromptCache {
    state: Mutex<CacheState>,
    counter: Arc<dyn TokenCounter>,
    config: CacheConfig,
}

impl PromptCache {
    pub fn new(config: CacheConfig, counter: Arc<dyn TokenCounter>) -> Result<Self, CacheError> {
        if config.max_entries == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            state: Mutex::new(CacheState::default()),
            counter,
            config,
        })
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            counter: Arc::new(TokenEstimator::default()),
            config: CacheConfig {
                ttl,
                ..Default::default()
            },
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Store `content` under `key` and return the key.
    ///
    /// Identical live content only has its expiry refreshed; anything else
    /// replaces the entry and counts as a write.
    pub fn register(&self, key: &str, content: &str) -> Result<String, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let estimated_tokens = self.counter.count(content);
        let now = Instant::now();
        let expires_at = now
            .checked_add(self.config.ttl)
            .ok_or(CacheError::TtlOverflow(self.config.ttl))?;

        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(entry) = state.entries.get_mut(key) {
            if entry.content == content && !entry.is_expired_at(now) {
                entry.expires_at = expires_at;
                debug!(key, "Refreshed cache entry");
                return Ok(key.to_string());
            }
        } else if state.entries.len() >= self.config.max_entries {
            self.evict(state, now);
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry::new(key, content, estimated_tokens, now, expires_at),
        );
        state.metrics.record_write();
        debug!(key, tokens = estimated_tokens, "Registered cache entry");

        Ok(key.to_string())
    }

    /// Live content for `key`, or `None` on a miss.
    ///
    /// Expired entries count as a miss and are dropped.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                state.metrics.record_hit(entry.estimated_tokens);
                return Some(entry.content.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            debug!(key, "Dropped expired cache entry");
        }
        state.metrics.record_miss();
        None
    }

    /// Remove every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - state.entries.len();

        if removed > 0 {
            info!(removed, remaining = state.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Drop `key`; returns whether it was present
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop all entries, keeping counters
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Snapshot of the entry under `key`, expired or not
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.lock().metrics.clone()
    }

    pub fn get_stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.lock();
        let live = state
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count();
        CacheStats::from_metrics(live, &state.metrics)
    }

    /// Make room for one entry: sweep expired, then drop least recently used
    fn evict(&self, state: &mut CacheState, now: Instant) {
        state.entries.retain(|_, entry| !entry.is_expired_at(now));
        if state.entries.len() < self.config.max_entries {
            return;
        }

        let oldest = state
            .entries
            .values()
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.key.clone());

        if let Some(key) = oldest {
            state.entries.remove(&key);
            info!(key = %key, "Evicted least recently used cache entry");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::with_ttl(super::DEFAULT_TTL)
    }
}

impl std::fmt::Debug for PromptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCache")
            .field("config", &self.config)
            .field("counter", &self.counter.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use std::thread;

    #[test]
    fn test_register_then_hit() {
        let cache = PromptCache::default();
        let key = cache.register("system_prompt", &"x".repeat(400)).unwrap();
        assert_eq!(key, "system_prompt");

        assert_eq!(cache.get("system_prompt"), Some("x".repeat(400)));
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.tokens_saved, 100);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn test_hits_are_counted_each_time() {
        let cache = PromptCache::default();
        cache.register("persona", &"p".repeat(80)).unwrap();
        cache.register("persona", &"p".repeat(80)).unwrap();

        cache.get("persona");
        cache.get("persona");

        let entry = cache.entry("persona").unwrap();
        assert_eq!(entry.hit_count, 2);

        let stats = cache.get_stats();
        assert_eq!(stats.tokens_saved, 2 * entry.estimated_tokens as u64);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_miss() {
        let cache = PromptCache::default();
        assert_eq!(cache.get("nonexistent"), None);

        let stats = cache.get_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_no_lookups_hit_rate_is_zero() {
        assert_eq!(PromptCache::default().get_stats().hit_rate, 0.0);
    }

    #[test]
    fn test_replacing_content_resets_entry() {
        let cache = PromptCache::default();
        cache.register("k", "old").unwrap();
        cache.get("k");

        cache.register("k", "new").unwrap();
        let entry = cache.entry("k").unwrap();
        assert_eq!(entry.content, "new");
        assert_eq!(entry.hit_count, 0);
        assert_eq!(cache.metrics().cache_writes, 2);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let cache = PromptCache::with_ttl(Duration::ZERO);
        cache.register("k", "content").unwrap();

        assert_eq!(cache.get("k"), None);
        assert!(cache.entry("k").is_none());
        assert_eq!(cache.metrics().cache_misses, 1);
    }

    #[test]
    fn test_entry_expiry_and_age() {
        let expired = PromptCache::with_ttl(Duration::ZERO);
        expired.register("k", "content").unwrap();
        assert!(expired.entry("k").unwrap().is_expired());

        let live = PromptCache::default();
        live.register("k", "content").unwrap();
        let entry = live.entry("k").unwrap();
        assert!(!entry.is_expired());
        assert!(entry.age() < DEFAULT_TTL);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = PromptCache::with_ttl(Duration::ZERO);
        cache.register("a", "1").unwrap();
        cache.register("b", "2").unwrap();
        cache.register("c", "3").unwrap();

        assert_eq!(cache.cleanup_expired(), 3);
        assert_eq!(cache.cleanup_expired(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_live_entries() {
        let cache = PromptCache::default();
        cache.register("a", "1").unwrap();
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = PromptCache::default();
        cache.register("a", "1").unwrap();
        cache.register("b", "2").unwrap();

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let cache = PromptCache::default();
        assert_eq!(cache.register("", "x"), Err(CacheError::EmptyKey));
    }

    #[test]
    fn test_ttl_overflow_rejected() {
        let cache = PromptCache::with_ttl(Duration::MAX);
        assert!(matches!(
            cache.register("k", "x"),
            Err(CacheError::TtlOverflow(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert!(PromptCache::new(config, Arc::new(TokenEstimator::default())).is_err());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let cache = PromptCache::new(config, Arc::new(TokenEstimator::default())).unwrap();

        cache.register("a", "1").unwrap();
        thread::sleep(Duration::from_millis(2));
        cache.register("b", "2").unwrap();
        thread::sleep(Duration::from_millis(2));
        cache.get("a");
        thread::sleep(Duration::from_millis(2));
        cache.register("c", "3").unwrap();

        assert!(cache.entry("a").is_some());
        assert!(cache.entry("b").is_none());
        assert!(cache.entry("c").is_some());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(PromptCache::default());
        cache.register("shared", &"s".repeat(40)).unwrap();

        thread::scope(|scope| {
            for i in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for j in 0..100 {
                        cache.get("shared");
                        cache.register(&format!("k{}-{}", i, j % 5), "v").unwrap();
                        if j % 10 == 0 {
                            cache.cleanup_expired();
                        }
                    }
                });
            }
        });

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 800);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.tokens_saved, 800 * 10);
        assert_eq!(cache.entry("shared").unwrap().hit_count, 800);
    }
}
