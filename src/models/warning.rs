//! Typed warnings for non-fatal evaluation anomalies.
//!
//! A bad model output never aborts a batch. It becomes a `None` prediction
//! plus one [`EvalWarning`] recorded on a shared [`WarningLog`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Warning categories emitted by judgekit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    /// Model answered with something outside the valid option set
    InvalidPrediction,
    /// Judge appears to favor longer outputs
    VerbosityBias,
    /// Grader returned a non-integral number where an integer was expected
    FloatGrading,
    /// Completion stopped on the token budget
    CompletionTruncated,
    /// Repeated or reordered runs disagree
    InconsistentPrediction,
    /// A metric skipped a row with no prediction
    IncompletePrediction,
    /// Completion failed with an error the retry policy does not recognize
    UnknownCompletionError,
}

impl WarningCategory {
    /// Stable machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPrediction => "invalid_prediction",
            Self::VerbosityBias => "verbosity_bias",
            Self::FloatGrading => "float_grading",
            Self::CompletionTruncated => "completion_truncated",
            Self::InconsistentPrediction => "inconsistent_prediction",
            Self::IncompletePrediction => "incomplete_prediction",
            Self::UnknownCompletionError => "unknown_completion_error",
        }
    }
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single warning with free-text context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalWarning {
    pub category: WarningCategory,
    pub context: String,
}

impl EvalWarning {
    pub fn new(category: WarningCategory, context: impl Into<String>) -> Self {
        Self {
            category,
            context: context.into(),
        }
    }
}

impl fmt::Display for EvalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.category)
        } else {
            write!(f, "{}: {}", self.category, self.context)
        }
    }
}

/// Thread-safe warning collector.
///
/// Cloning is cheap and every clone appends to the same log, so one handle
/// can be shared by a node, its client and the runner driving them.
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    entries: Arc<Mutex<Vec<EvalWarning>>>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and forward it to the tracing subscriber.
    pub fn emit(&self, category: WarningCategory, context: impl Into<String>) {
        let warning = EvalWarning::new(category, context);
        warn!(
            category = warning.category.as_str(),
            context = %warning.context,
            "evaluation warning"
        );
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(warning);
    }

    /// Snapshot of every warning recorded so far.
    pub fn entries(&self) -> Vec<EvalWarning> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded warnings in a category.
    pub fn count(&self, category: WarningCategory) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|w| w.category == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all recorded warnings, leaving the log empty.
    pub fn drain(&self) -> Vec<EvalWarning> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let log = WarningLog::new();
        let other = log.clone();
        other.emit(WarningCategory::InvalidPrediction, "'D' not in [A, B]");

        assert_eq!(log.len(), 1);
        assert_eq!(log.count(WarningCategory::InvalidPrediction), 1);
        assert_eq!(log.count(WarningCategory::FloatGrading), 0);
    }

    #[test]
    fn test_drain_empties_log() {
        let log = WarningLog::new();
        log.emit(WarningCategory::CompletionTruncated, "");
        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_display_names_category_and_context() {
        let w = EvalWarning::new(WarningCategory::FloatGrading, "2.5");
        assert_eq!(w.to_string(), "float_grading: 2.5");

        let w = EvalWarning::new(WarningCategory::CompletionTruncated, "");
        assert_eq!(w.to_string(), "completion_truncated");
    }
}
