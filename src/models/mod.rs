//! Core data models for judgekit.
//!
//! - Configuration and its validation
//! - Error taxonomy
//! - The column-oriented dataset evaluators read from and write to
//! - Prediction values and typed warnings

mod config;
mod dataset;
mod error;
mod prediction;
mod warning;

pub use config::*;
pub use dataset::*;
pub use error::*;
pub use prediction::*;
pub use warning::*;
