//! Completion capability consumed by evaluation nodes.

use crate::models::CompletionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A single chat completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    /// Token id to bias. Empty means unconstrained.
    pub logit_bias: HashMap<u32, i32>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            logit_bias: HashMap::new(),
            max_tokens: 16,
        }
    }

    pub fn with_logit_bias(mut self, logit_bias: HashMap<u32, i32>) -> Self {
        self.logit_bias = logit_bias;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Response from a completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Why generation stopped (`stop`, `length`, ...)
    pub finish_reason: Option<String>,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl CompletionResponse {
    pub fn truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Anything that can answer a chat completion.
///
/// Implementations are shared across runner threads.
pub trait Completion: Send + Sync {
    fn complete(&self, request: &CompletionRequest)
    -> Result<CompletionResponse, CompletionError>;
}

impl<C: Completion + ?Sized> Completion for std::sync::Arc<C> {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        (**self).complete(request)
    }
}
