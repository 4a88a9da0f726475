//! Completion client module.

mod cache;
mod completion;
mod llm_client;
mod rate_limiter;
mod retry;
mod tokenizer;

pub use cache::*;
pub use completion::*;
pub use llm_client::*;
pub use rate_limiter::*;
pub use retry::*;
pub use tokenizer::*;
