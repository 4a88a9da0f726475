//! Classification head with position debiasing.

use super::node::{Backend, HeadConfig, HeadCore};
use super::{ResponseFormat, prompt};
use crate::label::{
    LabelMapping, TOKENS, find_by_token, mappings_from_labels, next_mappings_for_consensus,
    render_mappings,
};
use crate::models::{DebiasStrategy, EvalError, Prediction, Result, WarningCategory};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Picks one label per sample.
///
/// Labels are shown under letter tokens. With [`DebiasStrategy::Shuffle`]
/// a fresh label order is drawn for every call. With
/// [`DebiasStrategy::Consensus`] the construction-time order is asked first,
/// then a rotated order; the label only counts when both agree.
pub struct ClassificationHead {
    core: HeadCore,
    labels: BTreeMap<String, String>,
    strategy: DebiasStrategy,
    base_mappings: Vec<LabelMapping>,
    last_mappings: Mutex<Vec<LabelMapping>>,
}

impl ClassificationHead {
    pub fn new(
        backend: Backend,
        config: HeadConfig,
        labels: BTreeMap<String, String>,
        strategy: DebiasStrategy,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(EvalError::InvalidConfig(
                "classification needs at least one label".to_string(),
            ));
        }
        if labels.len() > TOKENS.len() {
            return Err(EvalError::InvalidConfig(format!(
                "at most {} labels are supported, got {}",
                TOKENS.len(),
                labels.len()
            )));
        }

        let options: Vec<String> = TOKENS[..labels.len()]
            .iter()
            .map(char::to_string)
            .collect();
        let core = HeadCore::new(backend, config, &options);
        let base_mappings = core
            .shuffler
            .with_rng(|rng| mappings_from_labels(&labels, rng))?;

        Ok(Self {
            core,
            labels,
            strategy,
            last_mappings: Mutex::new(base_mappings.clone()),
            base_mappings,
        })
    }

    pub fn model(&self) -> &str {
        &self.core.config.model
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn strategy(&self) -> DebiasStrategy {
        self.strategy
    }

    /// Mapping set drawn at construction; the consensus first pass uses it.
    pub fn base_mappings(&self) -> &[LabelMapping] {
        &self.base_mappings
    }

    /// Mapping set of the most recent completion call.
    pub fn last_mappings(&self) -> Vec<LabelMapping> {
        self.last_mappings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn run(&self, sample: &str, context: Option<&str>) -> Result<Option<Prediction>> {
        let label = match self.strategy {
            DebiasStrategy::Shuffle => {
                let mappings = self
                    .core
                    .shuffler
                    .with_rng(|rng| mappings_from_labels(&self.labels, rng))?;
                self.classify_once(&mappings, sample, context)?
                    .map(|m| m.label)
            }
            DebiasStrategy::Consensus => self.classify_with_consensus(sample, context)?,
        };
        Ok(label.map(Prediction::Label))
    }

    fn classify_with_consensus(
        &self,
        sample: &str,
        context: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(first) = self.classify_once(&self.base_mappings, sample, context)? else {
            return Ok(None);
        };
        let Some(rotated) = next_mappings_for_consensus(&self.base_mappings, first.token) else {
            return Ok(Some(first.label));
        };
        let Some(second) = self.classify_once(&rotated, sample, context)? else {
            return Ok(None);
        };

        if first.label == second.label {
            return Ok(Some(first.label));
        }
        self.core.warnings().emit(
            WarningCategory::InconsistentPrediction,
            format!(
                "{:?} under the first label order, {:?} after reordering",
                first.label, second.label
            ),
        );
        Ok(None)
    }

    /// One completion call under `mappings`. Unknown answers warn and yield `None`.
    fn classify_once(
        &self,
        mappings: &[LabelMapping],
        sample: &str,
        context: Option<&str>,
    ) -> Result<Option<LabelMapping>> {
        *self
            .last_mappings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = mappings.to_vec();

        let system = prompt::classification_system(
            &self.core.config.context,
            &render_mappings(mappings),
            self.core.config.format,
        );
        let messages = self
            .core
            .messages(system, sample, context, |output| {
                rewrite_reference(mappings, output)
            });

        let answer = self.core.ask(messages)?;
        let resolved = match self.core.config.format {
            ResponseFormat::Direct => find_by_token(mappings, &answer),
            ResponseFormat::ChainOfThought => resolve_chain_of_thought(mappings, &answer),
        };

        match resolved {
            Some(mapping) => {
                debug!(token = %mapping.token, label = %mapping.label, "Classified sample");
                Ok(Some(mapping.clone()))
            }
            None => {
                let tokens: Vec<char> = mappings.iter().map(|m| m.token).collect();
                self.core.warnings().emit(
                    WarningCategory::InvalidPrediction,
                    format!("{answer:?} not in {tokens:?}"),
                );
                Ok(None)
            }
        }
    }
}

/// A reference answer naming a label becomes that label's current token.
fn rewrite_reference(mappings: &[LabelMapping], output: &str) -> String {
    mappings
        .iter()
        .find(|m| m.label == output.trim())
        .map_or_else(|| output.to_string(), |m| m.token.to_string())
}

/// Accept `A`, `A: description` or `A\n...` after the result delimiter.
fn resolve_chain_of_thought<'a>(
    mappings: &'a [LabelMapping],
    answer: &str,
) -> Option<&'a LabelMapping> {
    find_by_token(mappings, answer).or_else(|| {
        mappings.iter().find(|m| {
            [':', '\n']
                .iter()
                .any(|delimiter| answer.starts_with(&format!("{}{}", m.token, delimiter)))
        })
    })
}
