//! Retrieval-augmented generation metrics graded by an LLM.

use super::node::{Backend, HeadConfig};
use super::{GradingHead, ResponseFormat};
use crate::models::{EvalError, Prediction, Result, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Internal grading scale; grades are divided by its upper bound.
const RAG_SCALE: (i64, i64) = (0, 10);

/// Allow-listed RAG metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagMetric {
    /// Is every claim in the answer supported by the contexts?
    Faithfulness,
    /// Does the answer address the question?
    AnswerRelevancy,
    /// Are the retrieved contexts relevant to the question?
    ContextRelevancy,
    /// Do the contexts cover the ground truths?
    ContextRecall,
}

impl RagMetric {
    pub const ALL: [RagMetric; 4] = [
        RagMetric::Faithfulness,
        RagMetric::AnswerRelevancy,
        RagMetric::ContextRelevancy,
        RagMetric::ContextRecall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Faithfulness => "faithfulness",
            Self::AnswerRelevancy => "answer_relevancy",
            Self::ContextRelevancy => "context_relevancy",
            Self::ContextRecall => "context_recall",
        }
    }

    /// Dataset columns this metric reads.
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            Self::Faithfulness => &["question", "answer", "contexts"],
            Self::AnswerRelevancy => &["question", "answer"],
            Self::ContextRelevancy => &["question", "contexts"],
            Self::ContextRecall => &["ground_truths", "contexts"],
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Faithfulness => {
                "Evaluate if the answer is faithful to the contexts. Every claim in the answer \
                 must be supported by the contexts; unsupported claims are hallucinations. \
                 10 means fully supported, 0 means nothing is supported."
            }
            Self::AnswerRelevancy => {
                "Evaluate how relevant the answer is to the question. A relevant answer \
                 addresses the question directly and completely without unrelated content. \
                 10 means perfectly relevant, 0 means unrelated."
            }
            Self::ContextRelevancy => {
                "Evaluate how relevant the retrieved contexts are for answering the question. \
                 Penalize contexts that carry no information needed for the answer. \
                 10 means every context is needed, 0 means none is."
            }
            Self::ContextRecall => {
                "Evaluate if the contexts contain everything stated in the ground truths. \
                 10 means every ground-truth statement can be attributed to the contexts, \
                 0 means none can."
            }
        }
    }

    /// Sample text shown to the grader.
    fn render(&self, row: &Row) -> Result<String> {
        let mut sections = Vec::with_capacity(3);
        for field in self.inputs() {
            let section = match *field {
                "question" => format!("QUESTION:\n{}", text_field(row, field)?),
                "answer" => format!("ANSWER:\n{}", text_field(row, field)?),
                "contexts" => format!("CONTEXTS:\n{}", numbered(&list_field(row, field)?, "Chunk")),
                "ground_truths" => format!(
                    "GROUND TRUTHS:\n{}",
                    numbered(&list_field(row, field)?, "Truth")
                ),
                other => return Err(EvalError::Internal(format!("unknown RAG field {other}"))),
            };
            sections.push(section);
        }
        Ok(sections.join("\n\n"))
    }
}

impl fmt::Display for RagMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn text_field(row: &Row, field: &str) -> Result<String> {
    match row.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(EvalError::MissingInput(field.to_string())),
        Some(other) => Ok(other.to_string()),
    }
}

fn list_field(row: &Row, field: &str) -> Result<Vec<String>> {
    match row.get(field) {
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        Some(Value::Null) | None => Err(EvalError::MissingInput(field.to_string())),
        Some(_) => text_field(row, field).map(|s| vec![s]),
    }
}

fn numbered(items: &[String], name: &str) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[{name} {}]: {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scores one RAG row on `[0, 1]`.
pub struct RagNode {
    metric: RagMetric,
    head: GradingHead,
}

impl RagNode {
    pub fn new(
        backend: Backend,
        model: impl Into<String>,
        metric: RagMetric,
        format: ResponseFormat,
    ) -> Result<Self> {
        let config = HeadConfig {
            model: model.into(),
            context: metric.instruction().to_string(),
            format,
            ..Default::default()
        };
        let head = GradingHead::with_internal_range(backend, config, RAG_SCALE, RAG_SCALE)?;
        Ok(Self { metric, head })
    }

    pub fn metric(&self) -> RagMetric {
        self.metric
    }

    pub fn model(&self) -> &str {
        self.head.model()
    }

    pub fn run(&self, row: &Row) -> Result<Option<Prediction>> {
        let sample = self.metric.render(row)?;
        let grade = self.head.run(&sample, None)?;
        Ok(grade
            .and_then(|p| p.as_f64())
            .map(|g| Prediction::Float(g / RAG_SCALE.1 as f64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::testing::{FnCompletion, backend, scripted};
    use serde_json::json;
    use std::sync::Arc;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_metric_names_round_trip_through_serde() {
        for metric in RagMetric::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.as_str()));
        }
    }

    #[test]
    fn test_faithfulness_scales_to_unit_interval() {
        let completion = Arc::new(FnCompletion::new(|request| {
            let sample = &request.messages.last().unwrap().content;
            assert!(sample.contains("QUESTION:\nWhere is the Eiffel Tower?"));
            assert!(sample.contains("[Chunk 1]: The Eiffel Tower is in Paris."));
            Ok("8".to_string())
        }));
        let node = RagNode::new(
            backend(completion),
            "gpt-4",
            RagMetric::Faithfulness,
            ResponseFormat::Direct,
        )
        .unwrap();

        let input = row(&[
            ("question", json!("Where is the Eiffel Tower?")),
            ("answer", json!("Paris")),
            ("contexts", json!(["The Eiffel Tower is in Paris."])),
        ]);
        assert_eq!(node.run(&input).unwrap(), Some(Prediction::Float(0.8)));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let node = RagNode::new(
            backend(Arc::new(scripted(&["5"]))),
            "gpt-4",
            RagMetric::ContextRecall,
            ResponseFormat::Direct,
        )
        .unwrap();

        let input = row(&[("contexts", json!(["a"])), ("ground_truths", Value::Null)]);
        assert!(matches!(
            node.run(&input),
            Err(EvalError::MissingInput(field)) if field == "ground_truths"
        ));
    }

    #[test]
    fn test_invalid_grade_is_none() {
        let b = backend(Arc::new(scripted(&["11"])));
        let warnings = b.warnings.clone();
        let node = RagNode::new(b, "gpt-4", RagMetric::AnswerRelevancy, ResponseFormat::Direct)
            .unwrap();

        let input = row(&[("question", json!("q")), ("answer", json!("a"))]);
        assert_eq!(node.run(&input).unwrap(), None);
        assert_eq!(warnings.len(), 1);
    }
}
