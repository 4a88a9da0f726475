//! Tokenizer capability used to build logit-bias maps.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("No tokenizer available for model {0}")]
    Unsupported(String),

    #[error("Failed to load tokenizer for {model}: {message}")]
    Load { model: String, message: String },
}

/// Turns text into the token ids of a given model.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, model: &str, text: &str) -> Result<Vec<u32>, TokenizeError>;
}

/// BPE tokenizer for OpenAI models, backed by `tiktoken-rs`.
///
/// Encoders are loaded lazily and cached per model id.
#[derive(Default)]
pub struct BpeTokenizer {
    encoders: DashMap<String, Arc<CoreBPE>>,
}

impl BpeTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>, TokenizeError> {
        if let Some(bpe) = self.encoders.get(model) {
            return Ok(Arc::clone(&bpe));
        }

        if !model.starts_with("gpt") {
            return Err(TokenizeError::Unsupported(model.to_string()));
        }

        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .map_err(|e| TokenizeError::Load {
                model: model.to_string(),
                message: e.to_string(),
            })?;
        debug!(model = model, "Loaded BPE encoder");

        let bpe = Arc::new(bpe);
        self.encoders.insert(model.to_string(), Arc::clone(&bpe));
        Ok(bpe)
    }
}

impl Tokenizer for BpeTokenizer {
    fn tokenize(&self, model: &str, text: &str) -> Result<Vec<u32>, TokenizeError> {
        let bpe = self.encoder(model)?;
        Ok(bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|t| t as u32)
            .collect())
    }
}

/// Tokenizer that knows no model; every option falls back to parsing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTokenizer;

impl Tokenizer for NoTokenizer {
    fn tokenize(&self, model: &str, _text: &str) -> Result<Vec<u32>, TokenizeError> {
        Err(TokenizeError::Unsupported(model.to_string()))
    }
}
