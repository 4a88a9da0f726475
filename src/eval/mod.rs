//! Evaluation nodes, evaluators and reference metrics.

mod classify;
mod evaluator;
mod grade;
mod metric;
mod node;
pub mod prompt;
mod rag;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::*;
pub use evaluator::*;
pub use grade::*;
pub use metric::*;
pub use node::{
    Backend, CHAIN_OF_THOUGHT_MAX_TOKENS, DIRECT_MAX_TOKENS, HeadConfig, Node, ResponseFormat,
};
pub use rag::*;
