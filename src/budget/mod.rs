//! Per-task-type token budgets
//!
//! A [`BudgetTable`] maps each [`TaskType`] to total input/output allowances
//! and splits the input side into section sub-allocations with fixed
//! [`BudgetRatios`]. The split is exact: `system + conversation + context +
//! query == total_input` for every budget the table hands out.

use crate::classify::TaskType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

const RATIO_TOLERANCE: f64 = 1e-6;

/// Ratios are applied in integer parts-per-million to avoid float flooring
const PARTS_PER_MILLION: u64 = 1_000_000;

#[derive(Error, Debug, PartialEq)]
pub enum BudgetError {
    #[error("Budget ratios must sum to 1.0, got {0}")]
    RatioSum(f64),

    #[error("Budget ratio for {section} must be within 0.0..=1.0, got {value}")]
    RatioRange { section: &'static str, value: f64 },

    #[error("Unknown task type in budget overrides: {0}")]
    UnknownTask(String),

    #[error("Sub-allocations ({allocated}) exceed total input ({total_input}) for {task}")]
    OverAllocated {
        task: TaskType,
        allocated: usize,
        total_input: usize,
    },
}

/// Token allocation applied to one optimization call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub task_type: TaskType,
    pub total_input: usize,
    pub total_output: usize,
    pub system: usize,
    pub conversation: usize,
    pub context: usize,
    pub query: usize,
}

impl TokenBudget {
    /// Sum of all input sub-allocations
    pub fn allocated(&self) -> usize {
        self.system + self.conversation + self.context + self.query
    }

    fn check(&self) -> Result<(), BudgetError> {
        if self.allocated() > self.total_input {
            return Err(BudgetError::OverAllocated {
                task: self.task_type,
                allocated: self.allocated(),
                total_input: self.total_input,
            });
        }
        Ok(())
    }
}

/// Proportional split of `total_input` across prompt sections
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetRatios {
    pub system: f64,
    pub conversation: f64,
    pub context: f64,
    pub query: f64,
}

impl Default for BudgetRatios {
    fn default() -> Self {
        Self {
            system: 0.125,
            conversation: 0.25,
            context: 0.47,
            query: 0.155,
        }
    }
}

impl BudgetRatios {
    pub fn validate(&self) -> Result<(), BudgetError> {
        for (section, value) in [
            ("system", self.system),
            ("conversation", self.conversation),
            ("context", self.context),
            ("query", self.query),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BudgetError::RatioRange { section, value });
            }
        }

        let sum = self.system + self.conversation + self.context + self.query;
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(BudgetError::RatioSum(sum));
        }
        Ok(())
    }

    /// Split `total_input`; rounding remainder goes to the query slice
    fn split(&self, task_type: TaskType, total_input: usize, total_output: usize) -> TokenBudget {
        let portion = |ratio: f64| {
            let ppm = (ratio * PARTS_PER_MILLION as f64).round() as u64;
            (total_input as u64 * ppm / PARTS_PER_MILLION) as usize
        };
        let system = portion(self.system);
        let conversation = portion(self.conversation);
        let context = portion(self.context);
        let query = total_input.saturating_sub(system + conversation + context);

        TokenBudget {
            task_type,
            total_input,
            total_output,
            system,
            conversation,
            context,
            query,
        }
    }
}

/// Registry of per-task-type allowances
#[derive(Debug, Clone)]
pub struct BudgetTable {
    totals: HashMap<TaskType, (usize, usize)>,
    ratios: BudgetRatios,
}

impl BudgetTable {
    /// Built-in totals (input, output) per task type
    pub const DEFAULT_TOTALS: [(TaskType, usize, usize); 7] = [
        (TaskType::Classify, 8_000, 256),
        (TaskType::QuickFix, 16_000, 1_000),
        (TaskType::Implement, 32_000, 4_000),
        (TaskType::Review, 24_000, 2_000),
        (TaskType::Refactor, 64_000, 4_000),
        (TaskType::Coordinate, 128_000, 8_000),
        (TaskType::Default, 32_000, 4_000),
    ];

    pub fn new(ratios: BudgetRatios) -> Result<Self, BudgetError> {
        Self::default().with_ratios(ratios)
    }

    pub fn with_ratios(mut self, ratios: BudgetRatios) -> Result<Self, BudgetError> {
        ratios.validate()?;
        self.ratios = ratios;
        self.check_all()?;
        Ok(self)
    }

    pub fn with_override(
        mut self,
        task_type: TaskType,
        total_input: usize,
        total_output: usize,
    ) -> Result<Self, BudgetError> {
        self.totals.insert(task_type, (total_input, total_output));
        self.ratios
            .split(task_type, total_input, total_output)
            .check()?;
        Ok(self)
    }

    /// Apply overrides keyed by task label (as read from configuration)
    pub fn with_label_overrides<'a>(
        mut self,
        overrides: impl IntoIterator<Item = (&'a str, usize, usize)>,
    ) -> Result<Self, BudgetError> {
        for (label, input, output) in overrides {
            let task = label
                .parse::<TaskType>()
                .map_err(|_| BudgetError::UnknownTask(label.to_string()))?;
            self = self.with_override(task, input, output)?;
        }
        Ok(self)
    }

    pub fn ratios(&self) -> BudgetRatios {
        self.ratios
    }

    /// Budget for `task_type`, falling back to the `default` entry
    pub fn get_budget(&self, task_type: TaskType) -> TokenBudget {
        let (resolved, (input, output)) = match self.totals.get(&task_type) {
            Some(&totals) => (task_type, totals),
            None => (TaskType::Default, self.default_totals()),
        };
        self.ratios.split(resolved, input, output)
    }

    /// Budget by label; unknown labels get the `default` entry
    pub fn get_budget_by_label(&self, label: &str) -> TokenBudget {
        self.get_budget(label.parse().unwrap_or_default())
    }

    /// All budgets in [`TaskType::ALL`] order
    pub fn budgets(&self) -> Vec<TokenBudget> {
        TaskType::ALL.iter().map(|&t| self.get_budget(t)).collect()
    }

    fn default_totals(&self) -> (usize, usize) {
        self.totals
            .get(&TaskType::Default)
            .copied()
            .unwrap_or((32_000, 4_000))
    }

    fn check_all(&self) -> Result<(), BudgetError> {
        for (&task, &(input, output)) in &self.totals {
            self.ratios.split(task, input, output).check()?;
        }
        Ok(())
    }
}

impl Default for BudgetTable {
    fn default() -> Self {
        let totals = Self::DEFAULT_TOTALS
            .iter()
            .map(|&(task, input, output)| (task, (input, output)))
            .collect();
        Self {
            totals,
            ratios: BudgetRatios::default(),
        }
    }
}

/// Budget from the built-in table
pub fn get_budget(task_type: TaskType) -> TokenBudget {
    BudgetTable::default().get_budget(task_type)
}
