//! Configuration management for prompt-shaper
//!
//! Supports configuration via:
//! 1. Config file (~/.config/prompt-shaper/config.toml)
//! 2. Environment variables (PROMPT_SHAPER_CHARS_PER_TOKEN, PROMPT_SHAPER_CACHE_TTL_SECS, etc.)
//! 3. [`ConfigBuilder`] for programmatic setup

use crate::budget::BudgetRatios;
use crate::trim::TrimConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Token estimation settings
    pub estimator: EstimatorSettings,

    /// Prompt cache settings
    pub cache: CacheSettings,

    /// Conversation and context trimming settings
    pub trimming: TrimConfig,

    /// Budget table settings
    pub budgets: BudgetSettings,
}

/// Which token counter backs estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterBackend {
    /// Fixed characters-per-token ratio
    #[default]
    Chars,
    /// cl100k_base BPE vocabulary
    Cl100k,
}

/// Token estimation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Characters per token
    pub chars_per_token: f64,

    /// Tokens added per message for role/formatting
    pub message_overhead: usize,

    /// Counter implementation
    pub backend: CounterBackend,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            chars_per_token: crate::tokens::DEFAULT_CHARS_PER_TOKEN,
            message_overhead: crate::tokens::DEFAULT_MESSAGE_OVERHEAD,
            backend: CounterBackend::Chars,
        }
    }
}

/// Prompt cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether static content is cached at all
    pub enabled: bool,

    /// Entry lifetime in seconds
    pub ttl_secs: u64,

    /// Maximum live entries
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Per-task total override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOverride {
    pub total_input: usize,
    pub total_output: usize,
}

/// Budget table settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Section split of total input
    pub ratios: BudgetRatios,

    /// Totals keyed by task label (`quick_fix`, `review`, ...)
    pub overrides: BTreeMap<String, BudgetOverride>,
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prompt-shaper")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from specific path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ratio) = env_parse("PROMPT_SHAPER_CHARS_PER_TOKEN") {
            self.estimator.chars_per_token = ratio;
        }
        if let Some(ttl) = env_parse("PROMPT_SHAPER_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl;
        }
        if let Some(enabled) = env_parse("PROMPT_SHAPER_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
        if let Some(threshold) = env_parse("PROMPT_SHAPER_CONSOLIDATION_THRESHOLD") {
            self.trimming.consolidation_threshold = threshold;
        }

        self
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.estimator.chars_per_token.is_finite() || self.estimator.chars_per_token <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "estimator.chars_per_token must be positive, got {}",
                self.estimator.chars_per_token
            )));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }

        self.budgets
            .ratios
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for label in self.budgets.overrides.keys() {
            if label.parse::<crate::classify::TaskType>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "unknown task type in budgets.overrides: {}",
                    label
                )));
            }
        }

        Ok(())
    }

    /// Generate example config content
    pub fn example() -> String {
        let mut example = Config::default();
        example.budgets.overrides.insert(
            "review".to_string(),
            BudgetOverride {
                total_input: 24_000,
                total_output: 2_000,
            },
        );
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn chars_per_token(mut self, ratio: f64) -> Self {
        self.config.estimator.chars_per_token = ratio;
        self
    }

    pub fn backend(mut self, backend: CounterBackend) -> Self {
        self.config.estimator.backend = backend;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache.ttl_secs = secs;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn consolidation_threshold(mut self, threshold: usize) -> Self {
        self.config.trimming.consolidation_threshold = threshold;
        self
    }

    pub fn truncation_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.trimming.truncation_marker = marker.into();
        self
    }

    pub fn lookback_window(mut self, chars: usize) -> Self {
        self.config.trimming.lookback_window = chars;
        self
    }

    pub fn ratios(mut self, ratios: BudgetRatios) -> Self {
        self.config.budgets.ratios = ratios;
        self
    }

    pub fn budget_override(mut self, task: impl Into<String>, total_input: usize, total_output: usize) -> Self {
        self.config.budgets.overrides.insert(
            task.into(),
            BudgetOverride {
                total_input,
                total_output,
            },
        );
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
