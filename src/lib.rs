//! judgekit - LLM-as-judge evaluation of text datasets.
//!
//! ## Architecture
//!
//! - **Label mapping** (`label`): single-token stand-ins for labels, seeded
//!   shuffling and logit bias, numeric range parsing and rescaling
//! - **Evaluation nodes** (`eval`): classification, grading and RAG heads
//!   behind a uniform [`Evaluator`] interface
//! - **Runner** (`runner`): fans rows out over a bounded thread pool and
//!   appends results as a new column
//! - **Agreement** (`agreement`): Cohen's and Fleiss' kappa over repeated
//!   runs or several result columns
//!
//! ## Position bias
//!
//! Classification shows labels under shuffled letter tokens. With the
//! `consensus` strategy each sample is asked twice under rotated tokens and
//! disagreement yields no prediction.
//!
//! Model-output anomalies never abort a batch: they become a `None`
//! prediction plus a typed warning on a shared [`WarningLog`].

pub mod agreement;
pub mod client;
pub mod eval;
pub mod label;
pub mod models;
pub mod runner;

// Re-exports for convenience
pub use agreement::{interpret_kappa, kappa, kappa_for_column, kappa_for_columns};
pub use client::{BpeTokenizer, Completion, CompletionCache, LLMClient};
pub use eval::{Backend, Evaluator, Metric, RagMetric, build_evaluator};
pub use models::{Config, Dataset, EvalError, Prediction, Result, WarningLog};
pub use runner::LocalRunner;
