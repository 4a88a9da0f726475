//! Evaluator façade consumed by the runner.

use super::node::{Backend, HeadConfig};
use super::{ClassificationHead, GradingHead, Node, RagNode, ResponseFormat};
use crate::models::{EvalError, EvaluatorConfig, EvaluatorKind, Prediction, Result, Row};
use serde_json::Value;

/// Column a [`SimpleEvaluator`] reads its sample from.
pub const SAMPLE_COLUMN: &str = "sample";

/// Anything the runner can drive row by row.
///
/// `run` is called concurrently from the runner's worker threads.
pub trait Evaluator: Send + Sync {
    /// Name used in validation errors and logs.
    fn name(&self) -> &str;

    /// Dataset columns `run` reads, in order.
    fn inputs(&self) -> Vec<String>;

    fn run(&self, row: &Row) -> Result<Option<Prediction>>;
}

/// Wraps a [`Node`]: one text sample in, one prediction out.
pub struct SimpleEvaluator {
    node: Node,
    context_column: Option<String>,
}

impl SimpleEvaluator {
    pub fn new(node: impl Into<Node>) -> Self {
        Self {
            node: node.into(),
            context_column: None,
        }
    }

    /// Pass this column's value to the node as free-text context.
    pub fn with_context_column(mut self, column: impl Into<String>) -> Self {
        self.context_column = Some(column.into());
        self
    }

    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl Evaluator for SimpleEvaluator {
    fn name(&self) -> &str {
        "SimpleEvaluator"
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = vec![SAMPLE_COLUMN.to_string()];
        inputs.extend(self.context_column.clone());
        inputs
    }

    fn run(&self, row: &Row) -> Result<Option<Prediction>> {
        let sample = match row.get(SAMPLE_COLUMN) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(EvalError::MissingInput(SAMPLE_COLUMN.to_string()));
            }
            Some(other) => other.to_string(),
        };
        let context = self
            .context_column
            .as_deref()
            .and_then(|column| row.get(column))
            .and_then(|value| match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });

        self.node.run(&sample, context.as_deref())
    }
}

/// Wraps a [`RagNode`]; inputs depend on the metric.
pub struct RagEvaluator {
    node: RagNode,
}

impl RagEvaluator {
    pub fn new(node: RagNode) -> Self {
        Self { node }
    }
}

impl Evaluator for RagEvaluator {
    fn name(&self) -> &str {
        "RagEvaluator"
    }

    fn inputs(&self) -> Vec<String> {
        self.node
            .metric()
            .inputs()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn run(&self, row: &Row) -> Result<Option<Prediction>> {
        self.node.run(row)
    }
}

/// Evaluator backed by a closure with declared inputs.
pub struct FnEvaluator<F> {
    name: String,
    inputs: Vec<String>,
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Row) -> Result<Option<Prediction>> + Send + Sync,
{
    pub fn new<I, S>(name: impl Into<String>, inputs: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            f,
        }
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&Row) -> Result<Option<Prediction>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn run(&self, row: &Row) -> Result<Option<Prediction>> {
        (self.f)(row)
    }
}

/// Build the evaluator described by an `[evaluator]` config section.
pub fn build_evaluator(config: &EvaluatorConfig, backend: Backend) -> Result<Box<dyn Evaluator>> {
    let format = if config.chain_of_thought {
        ResponseFormat::ChainOfThought
    } else {
        ResponseFormat::Direct
    };
    let head_config = HeadConfig {
        model: config.model.clone(),
        context: config.context.clone(),
        references: config.references.clone(),
        seed: config.seed,
        format,
    };

    let evaluator: Box<dyn Evaluator> = match config.kind {
        EvaluatorKind::Classify => {
            let head = ClassificationHead::new(
                backend,
                head_config,
                config.labels.clone(),
                config.strategy,
            )?;
            Box::new(with_context(SimpleEvaluator::new(head), config))
        }
        EvaluatorKind::Grade => {
            let (Some(from), Some(to)) = (config.number_from, config.number_to) else {
                return Err(EvalError::InvalidConfig(
                    "number_from and number_to are required for grading".to_string(),
                ));
            };
            let head = GradingHead::new(backend, head_config, from, to)?;
            Box::new(with_context(SimpleEvaluator::new(head), config))
        }
        EvaluatorKind::Rag => {
            let metric = config.metric.ok_or_else(|| {
                EvalError::InvalidConfig("metric is required for RAG evaluation".to_string())
            })?;
            Box::new(RagEvaluator::new(RagNode::new(
                backend,
                config.model.clone(),
                metric,
                format,
            )?))
        }
    };
    Ok(evaluator)
}

fn with_context(evaluator: SimpleEvaluator, config: &EvaluatorConfig) -> SimpleEvaluator {
    match &config.context_column {
        Some(column) => evaluator.with_context_column(column.clone()),
        None => evaluator,
    }
}
