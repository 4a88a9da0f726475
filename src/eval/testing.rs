//! In-memory collaborators for node, evaluator and runner tests.

use super::Backend;
use crate::client::{
    Completion, CompletionRequest, CompletionResponse, TokenizeError, Tokenizer,
};
use crate::models::{CompletionError, WarningLog};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One token per character.
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn tokenize(&self, _model: &str, text: &str) -> Result<Vec<u32>, TokenizeError> {
        Ok(text.chars().map(|c| c as u32).collect())
    }
}

/// Completion answering through a closure, recording every request.
pub struct FnCompletion<F> {
    respond: F,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl<F> FnCompletion<F>
where
    F: Fn(&CompletionRequest) -> Result<String, CompletionError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl<F> Completion for FnCompletion<F>
where
    F: Fn(&CompletionRequest) -> Result<String, CompletionError> + Send + Sync,
{
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        let content = (self.respond)(request)?;
        Ok(CompletionResponse {
            content,
            finish_reason: Some("stop".to_string()),
            model: request.model.clone(),
            input_tokens: 0,
            output_tokens: 1,
        })
    }
}

/// Completion replaying a fixed list of answers in order.
pub fn scripted(
    answers: &[&str],
) -> FnCompletion<impl Fn(&CompletionRequest) -> Result<String, CompletionError> + Send + Sync + use<>>
{
    let queue: Mutex<VecDeque<String>> =
        Mutex::new(answers.iter().map(|s| s.to_string()).collect());
    FnCompletion::new(move |_| {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CompletionError::InvalidResponse("script exhausted".to_string()))
    })
}

/// Token the system prompt currently shows for `description`.
pub fn token_for(request: &CompletionRequest, description: &str) -> String {
    let system = &request.messages[0].content;
    system
        .lines()
        .find_map(|line| {
            let (token, rest) = line.split_once(": ")?;
            (token.len() == 1 && rest == description).then(|| token.to_string())
        })
        .unwrap_or_else(|| panic!("no option for {description:?} in {system:?}"))
}

/// Text of the final user message.
pub fn sample_of(request: &CompletionRequest) -> &str {
    let last = &request.messages[request.messages.len() - 1].content;
    last.rsplit_once("Text: ").map_or(last.as_str(), |(_, s)| s)
}

pub fn backend(completion: Arc<dyn Completion>) -> Backend {
    Backend::new(completion, Arc::new(CharTokenizer), WarningLog::new())
}
