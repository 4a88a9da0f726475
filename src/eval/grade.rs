//! Grading head: scores a sample on an integer range.

use super::node::{Backend, HeadConfig, HeadCore};
use super::prompt;
use crate::label::{map_number_range, parse_number};
use crate::models::{EvalError, Prediction, Result, WarningCategory};
use tracing::debug;

/// Public ranges with more options than this are graded on [`COMPRESSED_RANGE`].
pub const MAX_DIRECT_OPTIONS: i64 = 10;

/// Internal range used for wide public ranges.
pub const COMPRESSED_RANGE: (i64, i64) = (1, 5);

/// Scores one sample on `number_from..=number_to`.
///
/// Wide ranges are graded on `1..=5` and rescaled. Out-of-range answers
/// are rejected with a warning; non-integral answers are kept but warned
/// about.
pub struct GradingHead {
    core: HeadCore,
    public: (i64, i64),
    internal: (i64, i64),
    rounding: bool,
}

impl GradingHead {
    pub fn new(
        backend: Backend,
        config: HeadConfig,
        number_from: i64,
        number_to: i64,
    ) -> Result<Self> {
        let span = number_to.checked_sub(number_from).unwrap_or(i64::MAX);
        let internal = if span >= MAX_DIRECT_OPTIONS {
            COMPRESSED_RANGE
        } else {
            (number_from, number_to)
        };
        Self::with_internal_range(backend, config, (number_from, number_to), internal)
    }

    /// Grade on `internal` and rescale onto `public`, whatever their widths.
    pub fn with_internal_range(
        backend: Backend,
        config: HeadConfig,
        public: (i64, i64),
        internal: (i64, i64),
    ) -> Result<Self> {
        for (name, (from, to)) in [("public", public), ("internal", internal)] {
            if from >= to {
                return Err(EvalError::InvalidConfig(format!(
                    "{name} grading range {from}..={to} must have number_from < number_to"
                )));
            }
        }

        let options: Vec<String> = (internal.0..=internal.1).map(|n| n.to_string()).collect();
        Ok(Self {
            core: HeadCore::new(backend, config, &options),
            public,
            internal,
            rounding: true,
        })
    }

    /// Return floats instead of rounding to the nearest integer.
    pub fn without_rounding(mut self) -> Self {
        self.rounding = false;
        self
    }

    pub fn model(&self) -> &str {
        &self.core.config.model
    }

    pub fn public_range(&self) -> (i64, i64) {
        self.public
    }

    pub fn internal_range(&self) -> (i64, i64) {
        self.internal
    }

    pub fn run(&self, sample: &str, context: Option<&str>) -> Result<Option<Prediction>> {
        let (from, to) = self.internal;
        let system =
            prompt::grading_system(&self.core.config.context, from, to, self.core.config.format);
        let messages = self
            .core
            .messages(system, sample, context, |output| output.to_string());
        let answer = self.core.ask(messages)?;

        let Some(grade) = parse_number(&answer) else {
            self.core.warnings().emit(
                WarningCategory::InvalidPrediction,
                format!("{answer:?} is not a number"),
            );
            return Ok(None);
        };
        if grade < from as f64 || grade > to as f64 {
            self.core.warnings().emit(
                WarningCategory::InvalidPrediction,
                format!("{answer:?} not in {from}..={to}"),
            );
            return Ok(None);
        }
        if grade.fract() != 0.0 {
            self.core.warnings().emit(
                WarningCategory::FloatGrading,
                format!("{answer:?} where an integer in {from}..={to} was expected"),
            );
        }

        let value = if self.internal == self.public {
            grade
        } else {
            let mapped = map_number_range(
                grade,
                from as f64,
                to as f64,
                self.public.0 as f64,
                self.public.1 as f64,
            )?;
            debug!(
                grade = grade,
                mapped = mapped.value,
                clamped = mapped.clamped,
                "Rescaled grade"
            );
            mapped.value
        };

        Ok(Some(if self.rounding {
            Prediction::Integer(value.round() as i64)
        } else {
            Prediction::Float(value)
        }))
    }
}
