//! Evaluation nodes: the single-sample scoring units behind every evaluator.

use super::prompt;
use super::{ClassificationHead, GradingHead};
use crate::client::{Completion, CompletionRequest, Message, Tokenizer};
use crate::label::{ProviderCapabilities, Shuffler, capabilities_for, logit_bias_from};
use crate::models::{Prediction, Reference, Result, WarningLog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Token budget for an unconstrained direct answer.
pub const DIRECT_MAX_TOKENS: u32 = 16;

/// Token budget for a chain-of-thought answer.
pub const CHAIN_OF_THOUGHT_MAX_TOKENS: u32 = 256;

/// How the model is asked to answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// A bare option token
    #[default]
    Direct,
    /// Step-by-step thoughts, then the option under `### Result`
    ChainOfThought,
}

/// Collaborators shared by every node built for one run.
#[derive(Clone)]
pub struct Backend {
    pub completion: Arc<dyn Completion>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub warnings: WarningLog,
}

impl Backend {
    pub fn new(
        completion: Arc<dyn Completion>,
        tokenizer: Arc<dyn Tokenizer>,
        warnings: WarningLog,
    ) -> Self {
        Self {
            completion,
            tokenizer,
            warnings,
        }
    }
}

/// Settings common to classification and grading heads.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadConfig {
    pub model: String,
    /// Instructions placed in the system prompt
    pub context: String,
    pub references: Vec<Reference>,
    pub seed: u64,
    pub format: ResponseFormat,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            context: String::new(),
            references: Vec::new(),
            seed: 42,
            format: ResponseFormat::Direct,
        }
    }
}

/// Prompting and completion plumbing shared by the heads.
pub(crate) struct HeadCore {
    pub(crate) backend: Backend,
    pub(crate) config: HeadConfig,
    pub(crate) shuffler: Shuffler,
    capabilities: ProviderCapabilities,
    logit_bias: HashMap<u32, i32>,
}

impl HeadCore {
    /// `options` are the answer strings the model may produce; they are
    /// tokenized once here to build the logit bias.
    pub(crate) fn new(backend: Backend, config: HeadConfig, options: &[String]) -> Self {
        let capabilities = capabilities_for(&config.model);
        let logit_bias = match config.format {
            ResponseFormat::Direct => {
                logit_bias_from(backend.tokenizer.as_ref(), &config.model, options)
            }
            ResponseFormat::ChainOfThought => HashMap::new(),
        };
        debug!(
            model = %config.model,
            biased_tokens = logit_bias.len(),
            "Built evaluation head"
        );

        Self {
            shuffler: Shuffler::seeded(config.seed),
            backend,
            config,
            capabilities,
            logit_bias,
        }
    }

    pub(crate) fn warnings(&self) -> &WarningLog {
        &self.backend.warnings
    }

    pub(crate) fn max_tokens(&self) -> u32 {
        match self.config.format {
            ResponseFormat::ChainOfThought => CHAIN_OF_THOUGHT_MAX_TOKENS,
            ResponseFormat::Direct if !self.logit_bias.is_empty() => {
                self.capabilities.single_token_max_tokens
            }
            ResponseFormat::Direct => DIRECT_MAX_TOKENS,
        }
    }

    /// System prompt, few-shot pairs in a freshly drawn order, final sample.
    ///
    /// `rewrite_output` adjusts each reference answer to the current options.
    pub(crate) fn messages(
        &self,
        system: String,
        sample: &str,
        context: Option<&str>,
        rewrite_output: impl Fn(&str) -> String,
    ) -> Vec<Message> {
        let references = self.shuffler.shuffled(&self.config.references);

        let mut messages = Vec::with_capacity(references.len() * 2 + 2);
        messages.push(Message::system(system));
        for reference in &references {
            messages.push(Message::user(reference.input.clone()));
            messages.push(Message::assistant(rewrite_output(&reference.output)));
        }
        messages.push(Message::user(prompt::final_message(sample, context)));
        messages
    }

    /// Send the messages and return the answer part of the response, trimmed.
    pub(crate) fn ask(&self, messages: Vec<Message>) -> Result<String> {
        let request = CompletionRequest::new(self.config.model.clone(), messages)
            .with_logit_bias(self.logit_bias.clone())
            .with_max_tokens(self.max_tokens());

        let response = self.backend.completion.complete(&request)?;
        let answer = match self.config.format {
            ResponseFormat::Direct => response.content.trim(),
            ResponseFormat::ChainOfThought => prompt::result_section(&response.content),
        };
        Ok(answer.to_string())
    }
}

/// A single-sample evaluation unit.
pub enum Node {
    Classification(ClassificationHead),
    Grading(GradingHead),
}

impl Node {
    /// Score one sample. Malformed model output yields `Ok(None)`.
    pub fn run(&self, sample: &str, context: Option<&str>) -> Result<Option<Prediction>> {
        match self {
            Node::Classification(head) => head.run(sample, context),
            Node::Grading(head) => head.run(sample, context),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Node::Classification(head) => head.model(),
            Node::Grading(head) => head.model(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Classification(_) => "classification",
            Node::Grading(_) => "grading",
        }
    }
}

impl From<ClassificationHead> for Node {
    fn from(head: ClassificationHead) -> Self {
        Node::Classification(head)
    }
}

impl From<GradingHead> for Node {
    fn from(head: GradingHead) -> Self {
        Node::Grading(head)
    }
}
