//! Cohen's and Fleiss' kappa over prediction matrices.
//!
//! Input is a list of raters, each a sequence of predictions aligned by row.
//! Missing predictions are recoded to a sentinel category (`-1` for numeric
//! data, the empty string for labels) so rows never shift between raters.

use crate::models::{Dataset, EvalError, Prediction, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

const NUMERIC_SENTINEL: f64 = -1.0;
const LABEL_SENTINEL: &str = "";

/// Which statistic a score was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KappaMethod {
    /// Two raters
    Cohen,
    /// Three or more raters
    Fleiss,
}

impl fmt::Display for KappaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cohen => f.write_str("Cohen's kappa"),
            Self::Fleiss => f.write_str("Fleiss' kappa"),
        }
    }
}

/// Agreement score with the context needed to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementReport {
    pub method: KappaMethod,
    pub score: f64,
    pub raters: usize,
    pub items: usize,
    pub interpretation: String,
}

/// Kappa across `predictions`, one sequence per rater.
pub fn kappa(predictions: &[Vec<Option<Prediction>>]) -> Result<f64> {
    kappa_report(predictions).map(|report| report.score)
}

/// Like [`kappa`], but also reports the method and matrix shape.
pub fn kappa_report(predictions: &[Vec<Option<Prediction>>]) -> Result<AgreementReport> {
    validate(predictions)?;
    let (encoded, categories) = encode(predictions)?;
    let items = predictions[0].len();

    let (method, score) = if encoded.len() == 2 {
        let table = confusion_matrix(&encoded[0], &encoded[1], categories)?;
        (KappaMethod::Cohen, cohens_kappa(&table)?)
    } else {
        let by_item: Vec<Vec<usize>> = (0..items)
            .map(|item| encoded.iter().map(|rater| rater[item]).collect())
            .collect();
        let (table, _) = aggregate_raters(&by_item);
        (KappaMethod::Fleiss, fleiss_kappa(&table)?)
    };

    debug!(
        method = %method,
        raters = encoded.len(),
        items = items,
        categories = categories,
        score = score,
        "Computed agreement"
    );

    Ok(AgreementReport {
        method,
        score,
        raters: encoded.len(),
        items,
        interpretation: interpret_kappa(score).to_string(),
    })
}

/// Kappa over an items × repeats matrix, as written by a repeated run.
pub fn kappa_from_rows(rows: &[Vec<Option<Prediction>>]) -> Result<f64> {
    let Some(first) = rows.first() else {
        return Err(EvalError::EmptyPredictions(0));
    };
    let repeats = first.len();
    for (row, cells) in rows.iter().enumerate() {
        if cells.len() != repeats {
            return Err(EvalError::RaggedRow {
                row,
                expected: repeats,
                actual: cells.len(),
            });
        }
    }

    let raters: Vec<Vec<Option<Prediction>>> = (0..repeats)
        .map(|repeat| rows.iter().map(|cells| cells[repeat].clone()).collect())
        .collect();
    kappa(&raters)
}

/// Kappa across the repeats stored in one list-valued column.
pub fn kappa_for_column(dataset: &Dataset, column: &str) -> Result<f64> {
    let values = dataset
        .column(column)
        .ok_or_else(|| EvalError::ColumnNotFound(column.to_string()))?;

    let rows = values
        .iter()
        .enumerate()
        .map(|(row, value)| match value {
            Value::Array(cells) => Ok(cells.iter().map(Prediction::from_value).collect()),
            _ => Err(EvalError::ParseError(format!(
                "column '{column}' row {row} is not a list of repeated predictions"
            ))),
        })
        .collect::<Result<Vec<Vec<Option<Prediction>>>>>()?;
    kappa_from_rows(&rows)
}

/// Kappa with each named column acting as one rater.
pub fn kappa_for_columns(dataset: &Dataset, columns: &[&str]) -> Result<f64> {
    let raters = columns
        .iter()
        .map(|column| {
            dataset
                .column(column)
                .map(|values| values.iter().map(Prediction::from_value).collect())
                .ok_or_else(|| EvalError::ColumnNotFound(column.to_string()))
        })
        .collect::<Result<Vec<Vec<Option<Prediction>>>>>()?;
    kappa(&raters)
}

/// Landis & Koch band for a kappa score.
pub fn interpret_kappa(kappa: f64) -> &'static str {
    if kappa < 0.0 {
        "Poor"
    } else if kappa <= 0.20 {
        "Slight"
    } else if kappa <= 0.40 {
        "Fair"
    } else if kappa <= 0.60 {
        "Moderate"
    } else if kappa <= 0.80 {
        "Substantial"
    } else {
        "Almost Perfect"
    }
}

/// Counts of (rater a, rater b) category pairs.
///
/// Both sequences must have the same length and hold indices below
/// `categories`.
pub fn confusion_matrix(a: &[usize], b: &[usize], categories: usize) -> Result<Vec<Vec<usize>>> {
    if a.len() != b.len() {
        return Err(EvalError::RaterLengthMismatch {
            rater: 1,
            expected: a.len(),
            actual: b.len(),
        });
    }
    let mut table = vec![vec![0; categories]; categories];
    for (item, (&i, &j)) in a.iter().zip(b).enumerate() {
        if i >= categories || j >= categories {
            return Err(EvalError::MalformedTable(format!(
                "item {item} has category ({i}, {j}) outside 0..{categories}"
            )));
        }
        table[i][j] += 1;
    }
    Ok(table)
}

/// Cohen's kappa from a square contingency table.
///
/// Returns `0.0` when chance agreement is 1, i.e. both raters used one
/// and the same category throughout.
pub fn cohens_kappa(table: &[Vec<usize>]) -> Result<f64> {
    let k = table.len();
    if let Some(row) = table.iter().position(|row| row.len() != k) {
        return Err(EvalError::MalformedTable(format!(
            "row {row} has {} columns, expected {k}",
            table[row].len()
        )));
    }

    let total: usize = table.iter().flatten().sum();
    if total == 0 {
        return Ok(0.0);
    }
    let n = total as f64;

    let observed = (0..k).map(|i| table[i][i]).sum::<usize>() as f64 / n;
    let chance: f64 = (0..k)
        .map(|i| {
            let row = table[i].iter().sum::<usize>() as f64 / n;
            let col = table.iter().map(|r| r[i]).sum::<usize>() as f64 / n;
            row * col
        })
        .sum();

    if (1.0 - chance).abs() < f64::EPSILON {
        return Ok(0.0);
    }
    Ok((observed - chance) / (1.0 - chance))
}

/// Turn an items × raters matrix into an items × categories count table.
///
/// Categories are the distinct values present, sorted.
pub fn aggregate_raters<T: Ord + Clone>(data: &[Vec<T>]) -> (Vec<Vec<usize>>, Vec<T>) {
    let categories: Vec<T> = data
        .iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<T>>()
        .into_iter()
        .collect();

    let table = data
        .iter()
        .map(|ratings| {
            let mut counts = vec![0; categories.len()];
            for rating in ratings {
                if let Ok(index) = categories.binary_search(rating) {
                    counts[index] += 1;
                }
            }
            counts
        })
        .collect();
    (table, categories)
}

/// Fleiss' kappa from an items × categories count table.
///
/// Every item must have been rated by the same number of raters over the
/// same categories. Returns `0.0` when expected agreement is 1.
pub fn fleiss_kappa(table: &[Vec<usize>]) -> Result<f64> {
    let Some(first) = table.first() else {
        return Ok(0.0);
    };
    let categories = first.len();
    let rater_count: usize = first.iter().sum();
    for (item, counts) in table.iter().enumerate() {
        if counts.len() != categories {
            return Err(EvalError::MalformedTable(format!(
                "item {item} has {} categories, expected {categories}",
                counts.len()
            )));
        }
        let rated = counts.iter().sum::<usize>();
        if rated != rater_count {
            return Err(EvalError::MalformedTable(format!(
                "item {item} has {rated} ratings, expected {rater_count}"
            )));
        }
    }

    let raters = rater_count as f64;
    if raters < 2.0 {
        return Ok(0.0);
    }
    let items = table.len() as f64;

    let agreement: f64 = table
        .iter()
        .map(|counts| {
            let squares: f64 = counts.iter().map(|&c| (c * c) as f64).sum();
            (squares - raters) / (raters * (raters - 1.0))
        })
        .sum::<f64>()
        / items;

    let chance: f64 = (0..categories)
        .map(|j| {
            let share = table.iter().map(|counts| counts[j]).sum::<usize>() as f64
                / (items * raters);
            share * share
        })
        .sum();

    if (1.0 - chance).abs() < f64::EPSILON {
        return Ok(0.0);
    }
    Ok((agreement - chance) / (1.0 - chance))
}

fn validate(predictions: &[Vec<Option<Prediction>>]) -> Result<()> {
    if predictions.len() < 2 {
        return Err(EvalError::InsufficientRaters(predictions.len()));
    }
    if let Some(rater) = predictions.iter().position(Vec::is_empty) {
        return Err(EvalError::EmptyPredictions(rater));
    }
    let expected = predictions[0].len();
    for (rater, sequence) in predictions.iter().enumerate() {
        if sequence.len() != expected {
            return Err(EvalError::RaterLengthMismatch {
                rater,
                expected,
                actual: sequence.len(),
            });
        }
    }
    Ok(())
}

/// Encode every cell as an index into the categories shared by all raters.
fn encode(predictions: &[Vec<Option<Prediction>>]) -> Result<(Vec<Vec<usize>>, usize)> {
    let present = predictions.iter().flatten().flatten();
    let numeric = present.clone().any(Prediction::is_numeric);
    let labels = present.clone().any(|p| !p.is_numeric());
    if numeric && labels {
        return Err(EvalError::MixedRatingTypes);
    }

    if numeric {
        let value = |cell: &Option<Prediction>| {
            cell.as_ref()
                .and_then(Prediction::as_f64)
                .unwrap_or(NUMERIC_SENTINEL)
        };
        let mut categories: Vec<f64> = predictions.iter().flatten().map(value).collect();
        categories.sort_by(f64::total_cmp);
        categories.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);

        let encoded = predictions
            .iter()
            .map(|rater| {
                rater
                    .iter()
                    .map(|cell| {
                        let v = value(cell);
                        categories
                            .binary_search_by(|c| c.total_cmp(&v))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();
        Ok((encoded, categories.len()))
    } else {
        let value = |cell: &Option<Prediction>| match cell {
            Some(Prediction::Label(s)) => s.clone(),
            _ => LABEL_SENTINEL.to_string(),
        };
        let categories: Vec<String> = predictions
            .iter()
            .flatten()
            .map(value)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let encoded = predictions
            .iter()
            .map(|rater| {
                rater
                    .iter()
                    .map(|cell| categories.binary_search(&value(cell)).unwrap_or_default())
                    .collect()
            })
            .collect();
        Ok((encoded, categories.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(items: &[Option<&str>]) -> Vec<Option<Prediction>> {
        items.iter().map(|s| s.map(Prediction::from)).collect()
    }

    fn numbers(items: &[Option<i64>]) -> Vec<Option<Prediction>> {
        items.iter().map(|n| n.map(Prediction::from)).collect()
    }

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() < tolerance
    }

    #[test]
    fn test_cohens_kappa_tables() {
        let skewed = vec![vec![1, 2, 3], vec![2, 3, 3], vec![1, 1, 2]];
        assert!(close(cohens_kappa(&skewed).unwrap(), 0.01818, 1e-5));

        let uniform = vec![vec![1, 2, 3], vec![1, 2, 3], vec![1, 2, 3]];
        assert!(close(cohens_kappa(&uniform).unwrap(), 0.0, 1e-9));
    }

    #[test]
    fn test_malformed_tables_are_errors() {
        assert!(matches!(
            cohens_kappa(&[vec![1, 2], vec![3]]),
            Err(EvalError::MalformedTable(_))
        ));
        assert!(matches!(
            cohens_kappa(&[vec![1, 2, 3], vec![4, 5, 6]]),
            Err(EvalError::MalformedTable(_))
        ));

        assert!(matches!(
            confusion_matrix(&[0, 1], &[0], 2),
            Err(EvalError::RaterLengthMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            confusion_matrix(&[0, 2], &[0, 1], 2),
            Err(EvalError::MalformedTable(_))
        ));
        assert_eq!(
            confusion_matrix(&[0, 1, 1], &[0, 1, 0], 2).unwrap(),
            vec![vec![1, 0], vec![1, 1]]
        );

        assert!(matches!(
            fleiss_kappa(&[vec![2, 1], vec![3]]),
            Err(EvalError::MalformedTable(_))
        ));
        assert!(matches!(
            fleiss_kappa(&[vec![2, 1], vec![1, 1]]),
            Err(EvalError::MalformedTable(_))
        ));
        assert_eq!(fleiss_kappa(&[]).unwrap(), 0.0);
    }

    #[test]
    fn test_aggregate_raters() {
        let (table, categories) = aggregate_raters(&[vec![0, 1, 2], vec![1, 0, 1]]);
        assert_eq!(table, vec![vec![1, 1, 1], vec![1, 2, 0]]);
        assert_eq!(categories, vec![0, 1, 2]);

        let (table, categories) =
            aggregate_raters(&[vec![0, 1, 2], vec![1, 0, 1], vec![2, 2, 0], vec![1, 0, 2]]);
        assert_eq!(
            table,
            vec![vec![1, 1, 1], vec![1, 2, 0], vec![1, 0, 2], vec![1, 1, 1]]
        );
        assert_eq!(categories, vec![0, 1, 2]);
    }

    #[test]
    fn test_fleiss_kappa_three_raters() {
        let (table, _) = aggregate_raters(&[
            vec![1, 1, 1],
            vec![1, 1, 1],
            vec![1, 1, 1],
            vec![1, 1, 1],
            vec![3, 3, 2],
            vec![0, 0, 0],
            vec![0, 0, 0],
            vec![1, 1, 1],
        ]);
        assert!(close(fleiss_kappa(&table).unwrap(), 0.84516, 1e-5));
    }

    #[test]
    fn test_two_raters_agree_and_disagree() {
        let a = labels(&[Some("A"), Some("B")]);
        assert!(close(kappa(&[a.clone(), a.clone()]).unwrap(), 1.0, 1e-9));

        let inverted = labels(&[Some("B"), Some("A")]);
        assert!(close(kappa(&[a, inverted]).unwrap(), -1.0, 1e-9));
    }

    #[test]
    fn test_constant_raters_are_degenerate() {
        let positive = labels(&[Some("POSITIVE"), Some("POSITIVE")]);
        let negative = labels(&[Some("NEGATIVE"), Some("NEGATIVE")]);
        assert_eq!(kappa(&[positive, negative]).unwrap(), 0.0);

        let ones = numbers(&[Some(1), Some(1)]);
        let missing = numbers(&[None, None]);
        assert_eq!(kappa(&[ones, missing]).unwrap(), 0.0);
    }

    #[test]
    fn test_rows_are_transposed_into_raters() {
        let rows = vec![
            numbers(&[Some(1), Some(1), Some(1)]),
            numbers(&[Some(2), Some(2), Some(2)]),
            numbers(&[Some(1), None, None]),
        ];
        assert!(close(kappa_from_rows(&rows).unwrap(), 0.653, 1e-3));

        let rows = vec![
            numbers(&[Some(1), Some(1), Some(1)]),
            numbers(&[Some(0), Some(0), Some(0)]),
        ];
        assert!(close(kappa_from_rows(&rows).unwrap(), 1.0, 1e-9));

        let rows = vec![
            labels(&[Some("POSITIVE"), Some("NEGATIVE"), Some("POSITIVE")]),
            labels(&[Some("POSITIVE"), Some("NEGATIVE"), Some("POSITIVE")]),
        ];
        assert!(close(kappa_from_rows(&rows).unwrap(), -0.5, 1e-9));
    }

    #[test]
    fn test_categories_are_shared_across_raters() {
        // Neither rater uses the other's labels; agreement is still defined.
        let a = labels(&[Some("A"), Some("A"), Some("B")]);
        let b = labels(&[Some("C"), Some("C"), Some("C")]);
        assert_eq!(kappa(&[a, b]).unwrap(), 0.0);
    }

    #[test]
    fn test_report_names_method() {
        let a = numbers(&[Some(1), Some(2), Some(3)]);
        let report = kappa_report(&[a.clone(), a.clone()]).unwrap();
        assert_eq!(report.method, KappaMethod::Cohen);
        assert_eq!(report.interpretation, "Almost Perfect");

        let report = kappa_report(&[a.clone(), a.clone(), a]).unwrap();
        assert_eq!(report.method, KappaMethod::Fleiss);
        assert_eq!((report.raters, report.items), (3, 3));
    }

    #[test]
    fn test_invalid_matrices() {
        assert!(matches!(
            kappa(&[labels(&[Some("A")])]),
            Err(EvalError::InsufficientRaters(1))
        ));
        assert!(matches!(
            kappa(&[labels(&[Some("A")]), vec![]]),
            Err(EvalError::EmptyPredictions(1))
        ));
        assert!(matches!(
            kappa(&[labels(&[Some("A")]), labels(&[Some("A"), Some("B")])]),
            Err(EvalError::RaterLengthMismatch {
                rater: 1,
                expected: 1,
                actual: 2
            })
        ));
        assert!(matches!(
            kappa(&[labels(&[Some("A")]), numbers(&[Some(1)])]),
            Err(EvalError::MixedRatingTypes)
        ));
        assert!(matches!(
            kappa_from_rows(&[numbers(&[Some(1), Some(2)]), numbers(&[Some(1)])]),
            Err(EvalError::RaggedRow { row: 1, .. })
        ));
    }

    #[test]
    fn test_kappa_for_columns() {
        let dataset = Dataset::from_columns([
            ("result", vec![json!(["A", "A"]), json!(["B", "B"]), json!(["A", "A"])]),
            ("first", vec![json!("A"), json!("B"), json!(null)]),
            ("second", vec![json!("A"), json!("B"), json!(null)]),
        ])
        .unwrap();

        assert!(close(kappa_for_column(&dataset, "result").unwrap(), 1.0, 1e-9));
        assert!(close(
            kappa_for_columns(&dataset, &["first", "second"]).unwrap(),
            1.0,
            1e-9
        ));
        assert!(matches!(
            kappa_for_column(&dataset, "first"),
            Err(EvalError::ParseError(_))
        ));
        assert!(matches!(
            kappa_for_column(&dataset, "missing"),
            Err(EvalError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_interpret_kappa() {
        assert_eq!(interpret_kappa(-0.2), "Poor");
        assert_eq!(interpret_kappa(0.1), "Slight");
        assert_eq!(interpret_kappa(0.45), "Moderate");
        assert_eq!(interpret_kappa(0.85), "Almost Perfect");
    }
}
