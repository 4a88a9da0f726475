//! Inter-rater agreement over prediction columns.

mod kappa;

pub use kappa::*;
