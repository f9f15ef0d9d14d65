//! Task classification
//!
//! Maps a free-text query to the [`TaskType`] that selects its token budget.
//! Rules are an ordered list: the first rule with a matching keyword wins, so
//! urgent categories (`quick_fix`) are checked before constructive ones
//! (`implement`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of work a prompt is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classify,
    QuickFix,
    Implement,
    Review,
    Refactor,
    Coordinate,
    #[default]
    Default,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Classify,
        TaskType::QuickFix,
        TaskType::Implement,
        TaskType::Review,
        TaskType::Refactor,
        TaskType::Coordinate,
        TaskType::Default,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Classify => "classify",
            TaskType::QuickFix => "quick_fix",
            TaskType::Implement => "implement",
            TaskType::Review => "review",
            TaskType::Refactor => "refactor",
            TaskType::Coordinate => "coordinate",
            TaskType::Default => "default",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown task type: {0}")]
pub struct UnknownTaskType(pub String);

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        TaskType::ALL
            .into_iter()
            .find(|t| t.label() == normalized)
            .ok_or_else(|| UnknownTaskType(s.to_string()))
    }
}

/// A keyword family mapped to a task type
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub keywords: Vec<&'static str>,
    pub task_type: TaskType,
}

impl KeywordRule {
    pub fn new(task_type: TaskType, keywords: &[&'static str]) -> Self {
        Self {
            keywords: keywords.to_vec(),
            task_type,
        }
    }

    /// `lowered` must already be lowercase
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k))
    }
}

/// Ordered keyword classifier
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    rules: Vec<KeywordRule>,
}

impl TaskClassifier {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Classify `query`, honoring a recognized `explicit_hint` unchanged.
    ///
    /// Unrecognized or blank hints fall through to keyword matching.
    pub fn classify(&self, query: &str, explicit_hint: Option<&str>) -> TaskType {
        if let Some(task) = explicit_hint.and_then(|h| h.parse::<TaskType>().ok()) {
            return task;
        }

        let lowered = query.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.task_type)
            .unwrap_or(TaskType::Default)
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(TaskType::Classify, &["classify", "categorize", "labeling"]),
            KeywordRule::new(TaskType::QuickFix, &["bug", "fix", "error", "crash"]),
            KeywordRule::new(TaskType::Refactor, &["refactor", "restructure", "migrate"]),
            KeywordRule::new(TaskType::Review, &["review", "audit", "inspect"]),
            KeywordRule::new(
                TaskType::Coordinate,
                &["orchestrate", "coordinate", "swarm", "multi-agent"],
            ),
            KeywordRule::new(TaskType::Implement, &["implement", "build", "add", "create"]),
        ])
    }
}

/// Classify with the built-in rule order
pub fn classify(query: &str, explicit_hint: Option<&str>) -> TaskType {
    TaskClassifier::default().classify(query, explicit_hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_query_is_quick_fix() {
        assert_eq!(
            classify("Fix the null pointer bug in login", None),
            TaskType::QuickFix
        );
    }

    #[test]
    fn test_hint_always_wins() {
        for query in ["Fix the crash", "implement a cache", "", "swarm of agents"] {
            assert_eq!(classify(query, Some("review")), TaskType::Review);
        }
    }

    #[test]
    fn test_unknown_hint_falls_back_to_keywords() {
        assert_eq!(classify("refactor the parser", Some("revue")), TaskType::Refactor);
        assert_eq!(classify("refactor the parser", Some("")), TaskType::Refactor);
    }

    #[test]
    fn test_fix_beats_implement() {
        assert_eq!(
            classify("Add a test and fix the error path", None),
            TaskType::QuickFix
        );
    }

    #[test]
    fn test_label_mention_is_not_labeling_work() {
        assert_eq!(
            classify("Fix the crash in the label renderer", None),
            TaskType::QuickFix
        );
        assert_eq!(classify("Labeling pass over the dataset", None), TaskType::Classify);
    }

    #[test]
    fn test_family_order() {
        assert_eq!(classify("Classify these tickets", None), TaskType::Classify);
        assert_eq!(classify("Migrate config to TOML", None), TaskType::Refactor);
        assert_eq!(classify("Audit the unsafe blocks", None), TaskType::Review);
        assert_eq!(classify("Coordinate the worker swarm", None), TaskType::Coordinate);
        assert_eq!(classify("Create a new endpoint", None), TaskType::Implement);
        assert_eq!(classify("hello there", None), TaskType::Default);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("REVIEW THIS DIFF", None), TaskType::Review);
    }

    #[test]
    fn test_labels_round_trip() {
        for task in TaskType::ALL {
            assert_eq!(task.label().parse::<TaskType>(), Ok(task));
        }
        assert!("quickfix".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_custom_rules() {
        let classifier = TaskClassifier::new(vec![KeywordRule::new(
            TaskType::Coordinate,
            &["deploy"],
        )]);
        assert_eq!(classifier.classify("deploy it", None), TaskType::Coordinate);
        assert_eq!(classifier.classify("fix it", None), TaskType::Default);
    }
}
