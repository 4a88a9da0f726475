//! Runs an evaluator over every row of a dataset on a bounded thread pool.

use crate::agreement::kappa;
use crate::eval::Evaluator;
use crate::models::{
    Dataset, EvalError, Prediction, Result, Row, RunnerConfig, WarningCategory, WarningLog,
    to_cell,
};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

/// Default upper bound on worker threads.
pub const DEFAULT_NUM_THREADS: usize = 8;

/// Repeated runs agreeing less than this get an inconsistency warning.
pub const CONSISTENCY_THRESHOLD: f64 = 0.4;

/// Drives one [`Evaluator`] over one [`Dataset`].
///
/// Required columns are checked once, at construction. Each [`run`] is
/// independent; rows are evaluated in parallel and results come back in
/// row order.
///
/// [`run`]: LocalRunner::run
pub struct LocalRunner<'a> {
    evaluator: &'a dyn Evaluator,
    dataset: &'a Dataset,
    inputs: Vec<String>,
    output_column: String,
    num_threads: usize,
    show_progress: bool,
    warnings: WarningLog,
}

impl<'a> LocalRunner<'a> {
    pub fn new(
        evaluator: &'a dyn Evaluator,
        dataset: &'a Dataset,
        output_column: impl Into<String>,
    ) -> Result<Self> {
        let inputs = evaluator.inputs();
        if inputs.iter().any(|column| !dataset.has_column(column)) {
            return Err(EvalError::MissingColumns {
                evaluator: evaluator.name().to_string(),
                required: inputs,
                available: dataset.column_names(),
            });
        }

        let output_column = output_column.into();
        if dataset.has_column(&output_column) {
            return Err(EvalError::DuplicateColumn(output_column));
        }

        Ok(Self {
            evaluator,
            dataset,
            inputs,
            output_column,
            num_threads: DEFAULT_NUM_THREADS,
            show_progress: true,
            warnings: WarningLog::new(),
        })
    }

    /// Apply thread cap and progress settings from a `[runner]` section.
    pub fn with_config(self, config: &RunnerConfig) -> Result<Self> {
        Ok(self
            .with_num_threads(config.num_threads)?
            .show_progress(config.show_progress))
    }

    /// Cap the worker pool at `num_threads`; zero is rejected.
    pub fn with_num_threads(mut self, num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(EvalError::InvalidConfig(
                "num_threads must be a positive integer".to_string(),
            ));
        }
        self.num_threads = num_threads;
        Ok(self)
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Record repeat-run inconsistencies on `warnings` instead of a private log.
    pub fn with_warnings(mut self, warnings: WarningLog) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    pub fn output_column(&self) -> &str {
        &self.output_column
    }

    /// Evaluate every row `num` times and return the dataset with the
    /// output column appended.
    ///
    /// With `num == 1` each cell holds one prediction (or `null`); with
    /// `num > 1` each cell holds a list of `num` predictions. The first
    /// error raised by any row aborts the run.
    pub fn run(&self, num: usize) -> Result<Dataset> {
        if num == 0 {
            return Err(EvalError::InvalidConfig(
                "number of runs must be at least 1".to_string(),
            ));
        }
        let rows = self.rows();
        let threads = self.num_threads.min(rows.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("judgekit-runner-{i}"))
            .build()
            .map_err(|e| EvalError::Internal(format!("failed to build thread pool: {e}")))?;

        info!(
            evaluator = self.evaluator.name(),
            rows = rows.len(),
            threads = threads,
            repeats = num,
            "Starting evaluation"
        );
        let start = Instant::now();
        let pb = self.progress_bar((rows.len() * num) as u64)?;

        let evaluator = self.evaluator;
        let mut passes: Vec<Vec<Option<Prediction>>> = Vec::with_capacity(num);
        for pass in 0..num {
            let results = pool.install(|| {
                rows.par_iter()
                    .map(|row| {
                        let result = evaluator.run(row);
                        pb.inc(1);
                        result
                    })
                    .collect::<Result<Vec<_>>>()
            });
            match results {
                Ok(results) => {
                    debug!(pass = pass, "Pass complete");
                    passes.push(results);
                }
                Err(e) => {
                    pb.abandon_with_message("failed");
                    return Err(e);
                }
            }
        }
        pb.finish_with_message("done");

        if num > 1 && !rows.is_empty() {
            self.check_consistency(&passes);
        }

        let values = if num == 1 {
            passes
                .into_iter()
                .flatten()
                .map(to_cell)
                .collect::<Vec<Value>>()
        } else {
            (0..rows.len())
                .map(|i| Value::Array(passes.iter().map(|pass| to_cell(pass[i].clone())).collect()))
                .collect()
        };

        info!(
            rows = rows.len(),
            repeats = num,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Evaluation complete"
        );
        self.dataset.add_column(self.output_column.clone(), values)
    }

    /// Rows restricted to the evaluator's input columns.
    fn rows(&self) -> Vec<Row> {
        let columns: Vec<(&str, &[Value])> = self
            .inputs
            .iter()
            .filter_map(|name| {
                self.dataset
                    .column(name)
                    .map(|values| (name.as_str(), values))
            })
            .collect();

        (0..self.dataset.len())
            .map(|i| {
                columns
                    .iter()
                    .map(|(name, values)| (name.to_string(), values[i].clone()))
                    .collect()
            })
            .collect()
    }

    fn progress_bar(&self, total: u64) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .map_err(|e| EvalError::Internal(format!("invalid progress template: {e}")))?
                .progress_chars("##-"),
        );
        Ok(pb)
    }

    /// Warn when repeated passes disagree beyond chance.
    fn check_consistency(&self, passes: &[Vec<Option<Prediction>>]) {
        match kappa(passes) {
            Ok(score) if score < CONSISTENCY_THRESHOLD => self.warnings.emit(
                WarningCategory::InconsistentPrediction,
                format!(
                    "kappa {score:.3} across {} repeats of {} is below {CONSISTENCY_THRESHOLD}",
                    passes.len(),
                    self.evaluator.name()
                ),
            ),
            Ok(score) => debug!(kappa = score, "Repeats are consistent"),
            Err(e) => debug!(error = %e, "Agreement not computable"),
        }
    }
}
