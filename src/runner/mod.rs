//! Concurrent dataset runner.

mod local;

pub use local::*;
