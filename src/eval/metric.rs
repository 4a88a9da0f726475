//! Reference metrics: predictions scored against known answers.
//!
//! Only the allow-listed [`Metric`] variants are supported. Rows without a
//! prediction are skipped with an [`WarningCategory::IncompletePrediction`]
//! warning; rows without a reference are an error.

use crate::models::{EvalError, Prediction, Result, WarningCategory, WarningLog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    /// Same variant and value; `3` and `3.0` differ
    ExactMatch,
    /// Macro-averaged over the union of labels
    Precision,
    /// Macro-averaged over the union of labels
    Recall,
    /// Macro-averaged over the union of labels
    F1,
    MatthewsCorrelation,
    Mse,
    Mae,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Accuracy,
        Metric::ExactMatch,
        Metric::Precision,
        Metric::Recall,
        Metric::F1,
        Metric::MatthewsCorrelation,
        Metric::Mse,
        Metric::Mae,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::ExactMatch => "exact_match",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::MatthewsCorrelation => "matthews_correlation",
            Self::Mse => "mse",
            Self::Mae => "mae",
        }
    }

    /// Score `predictions` against `references`, aligned by row.
    pub fn compute(
        &self,
        predictions: &[Option<Prediction>],
        references: &[Option<Prediction>],
        warnings: &WarningLog,
    ) -> Result<f64> {
        if predictions.len() != references.len() {
            return Err(EvalError::ColumnLengthMismatch {
                column: "references".to_string(),
                expected: predictions.len(),
                actual: references.len(),
            });
        }

        let mut pairs = Vec::with_capacity(predictions.len());
        for (row, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            let reference = reference.as_ref().ok_or(EvalError::NoneReference(row))?;
            match prediction {
                Some(prediction) => pairs.push((prediction, reference)),
                None => warnings.emit(
                    WarningCategory::IncompletePrediction,
                    format!("row {row} has no prediction, skipped by {self}"),
                ),
            }
        }
        if pairs.is_empty() {
            return Err(EvalError::NoScorablePredictions);
        }

        match self {
            Self::Accuracy => Ok(fraction(&pairs, |p, r| key(p) == key(r))),
            Self::ExactMatch => Ok(fraction(&pairs, |p, r| p == r)),
            Self::Precision => Ok(macro_average(&pairs, |s| s.precision())),
            Self::Recall => Ok(macro_average(&pairs, |s| s.recall())),
            Self::F1 => Ok(macro_average(&pairs, |s| s.f1())),
            Self::MatthewsCorrelation => Ok(matthews(&pairs)),
            Self::Mse => numeric_mean(&pairs, |d| d * d, *self),
            Self::Mae => numeric_mean(&pairs, f64::abs, *self),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown metric {s:?}, expected one of {names:?}")
            })
    }
}

/// Class identity: numbers compare by value, labels by text.
fn key(p: &Prediction) -> String {
    match p.as_f64() {
        Some(n) => format!("{n}"),
        None => p.to_string(),
    }
}

fn fraction(
    pairs: &[(&Prediction, &Prediction)],
    hit: impl Fn(&Prediction, &Prediction) -> bool,
) -> f64 {
    let hits = pairs.iter().filter(|(p, r)| hit(*p, *r)).count();
    hits as f64 / pairs.len() as f64
}

#[derive(Debug, Default, Clone, Copy)]
struct ClassStats {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl ClassStats {
    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn class_stats(pairs: &[(&Prediction, &Prediction)]) -> BTreeMap<String, ClassStats> {
    let mut stats: BTreeMap<String, ClassStats> = BTreeMap::new();
    for (p, r) in pairs {
        let (p, r) = (key(p), key(r));
        if p == r {
            stats.entry(p).or_default().tp += 1;
        } else {
            stats.entry(p).or_default().fp += 1;
            stats.entry(r).or_default().fn_ += 1;
        }
    }
    stats
}

fn macro_average(
    pairs: &[(&Prediction, &Prediction)],
    score: impl Fn(&ClassStats) -> f64,
) -> f64 {
    let stats = class_stats(pairs);
    stats.values().map(score).sum::<f64>() / stats.len() as f64
}

/// Multiclass Matthews correlation coefficient.
fn matthews(pairs: &[(&Prediction, &Prediction)]) -> f64 {
    let classes: BTreeSet<String> = pairs
        .iter()
        .flat_map(|(p, r)| [key(p), key(r)])
        .collect();

    let s = pairs.len() as f64;
    let c = pairs.iter().filter(|(p, r)| key(p) == key(r)).count() as f64;
    let (mut pt, mut pp, mut tt) = (0.0, 0.0, 0.0);
    for class in &classes {
        let predicted = pairs.iter().filter(|(p, _)| &key(p) == class).count() as f64;
        let actual = pairs.iter().filter(|(_, r)| &key(r) == class).count() as f64;
        pt += predicted * actual;
        pp += predicted * predicted;
        tt += actual * actual;
    }

    let denominator = ((s * s - pp) * (s * s - tt)).sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        (c * s - pt) / denominator
    }
}

fn numeric_mean(
    pairs: &[(&Prediction, &Prediction)],
    loss: impl Fn(f64) -> f64,
    metric: Metric,
) -> Result<f64> {
    let mut total = 0.0;
    for (p, r) in pairs {
        let (Some(p), Some(r)) = (p.as_f64(), r.as_f64()) else {
            return Err(EvalError::InvalidConfig(format!(
                "{metric} needs numeric predictions and references"
            )));
        };
        total += loss(p - r);
    }
    Ok(total / pairs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[Option<&str>]) -> Vec<Option<Prediction>> {
        items.iter().map(|s| s.map(Prediction::from)).collect()
    }

    fn numbers(items: &[Option<i64>]) -> Vec<Option<Prediction>> {
        items.iter().map(|n| n.map(Prediction::from)).collect()
    }

    #[test]
    fn test_accuracy_skips_missing_predictions() {
        let warnings = WarningLog::new();
        let predictions = labels(&[Some("POS"), None, Some("NEG"), Some("POS")]);
        let references = labels(&[Some("POS"), Some("NEG"), Some("POS"), Some("POS")]);

        let score = Metric::Accuracy
            .compute(&predictions, &references, &warnings)
            .unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(warnings.count(WarningCategory::IncompletePrediction), 1);
    }

    #[test]
    fn test_none_reference_is_an_error() {
        let predictions = labels(&[Some("POS"), Some("NEG")]);
        let references = labels(&[Some("POS"), None]);
        assert!(matches!(
            Metric::Accuracy.compute(&predictions, &references, &WarningLog::new()),
            Err(EvalError::NoneReference(1))
        ));
    }

    #[test]
    fn test_nothing_to_score() {
        let predictions = labels(&[None, None]);
        let references = labels(&[Some("POS"), Some("NEG")]);
        assert!(matches!(
            Metric::F1.compute(&predictions, &references, &WarningLog::new()),
            Err(EvalError::NoScorablePredictions)
        ));
    }

    #[test]
    fn test_macro_precision_recall_f1() {
        // POS: tp 1, fp 1, fn 1; NEG: tp 1, fp 1, fn 1
        let predictions = labels(&[Some("POS"), Some("POS"), Some("NEG"), Some("NEG")]);
        let references = labels(&[Some("POS"), Some("NEG"), Some("POS"), Some("NEG")]);
        let warnings = WarningLog::new();

        for metric in [Metric::Precision, Metric::Recall, Metric::F1] {
            let score = metric.compute(&predictions, &references, &warnings).unwrap();
            assert!((score - 0.5).abs() < 1e-9, "{metric}: {score}");
        }
    }

    #[test]
    fn test_matthews_perfect_and_inverted() {
        let warnings = WarningLog::new();
        let truth = labels(&[Some("A"), Some("B"), Some("A"), Some("B")]);
        let inverted = labels(&[Some("B"), Some("A"), Some("B"), Some("A")]);

        let perfect = Metric::MatthewsCorrelation
            .compute(&truth, &truth, &warnings)
            .unwrap();
        assert!((perfect - 1.0).abs() < 1e-9);

        let worst = Metric::MatthewsCorrelation
            .compute(&inverted, &truth, &warnings)
            .unwrap();
        assert!((worst + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_numeric_errors() {
        let warnings = WarningLog::new();
        let predictions = numbers(&[Some(3), Some(5), Some(1)]);
        let references = numbers(&[Some(4), Some(5), Some(3)]);

        let mse = Metric::Mse.compute(&predictions, &references, &warnings).unwrap();
        assert!((mse - 5.0 / 3.0).abs() < 1e-9);
        let mae = Metric::Mae.compute(&predictions, &references, &warnings).unwrap();
        assert!((mae - 1.0).abs() < 1e-9);

        assert!(
            Metric::Mse
                .compute(&labels(&[Some("A")]), &labels(&[Some("B")]), &warnings)
                .is_err()
        );
    }

    #[test]
    fn test_integer_and_float_compare_by_value() {
        let predictions = vec![Some(Prediction::Float(3.0))];
        let references = vec![Some(Prediction::Integer(3))];
        let score = Metric::Accuracy
            .compute(&predictions, &references, &WarningLog::new())
            .unwrap();
        assert_eq!(score, 1.0);
        assert_eq!(
            Metric::ExactMatch
                .compute(&predictions, &references, &WarningLog::new())
                .unwrap(),
            0.0
        );
    }

    #[test]
    fn test_parse_metric_names() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
        assert!("bleu".parse::<Metric>().is_err());
    }
}
