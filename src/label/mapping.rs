//! Token ↔ label mappings for position-debiased classification.
//!
//! Labels are presented to the model under single-letter tokens. The order
//! of labels is drawn at random and tokens are handed out alphabetically over
//! that order, so whichever label the model prefers by position changes from
//! call to call.

use crate::models::{EvalError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tokens in assignment order.
pub const TOKENS: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// One label presented under a single-character token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pub token: char,
    pub label: String,
    pub description: String,
}

impl LabelMapping {
    /// Text shown to the model for this option.
    pub fn render(&self) -> String {
        if self.description.is_empty() {
            format!("{}: {}", self.token, self.label)
        } else {
            format!("{}: {}", self.token, self.description)
        }
    }
}

/// Draw a random label order and assign tokens `A, B, C, …` over it.
pub fn mappings_from_labels<R: Rng + ?Sized>(
    labels: &BTreeMap<String, String>,
    rng: &mut R,
) -> Result<Vec<LabelMapping>> {
    if labels.len() > TOKENS.len() {
        return Err(EvalError::InvalidConfig(format!(
            "at most {} labels are supported, got {}",
            TOKENS.len(),
            labels.len()
        )));
    }

    let mut entries: Vec<(&String, &String)> = labels.iter().collect();
    entries.shuffle(rng);

    Ok(assign_tokens(
        entries
            .into_iter()
            .map(|(label, description)| (label.clone(), description.clone())),
    ))
}

fn assign_tokens(entries: impl IntoIterator<Item = (String, String)>) -> Vec<LabelMapping> {
    TOKENS
        .iter()
        .zip(entries)
        .map(|(&token, (label, description))| LabelMapping {
            token,
            label,
            description,
        })
        .collect()
}

/// Reorder `current` so the label behind `chosen_token` sits elsewhere.
///
/// Labels rotate one position to the right and tokens are re-assigned, so
/// every label, the chosen one included, moves to a new ordinal position.
/// Returns `None` when fewer than two labels exist or the token is unknown.
pub fn next_mappings_for_consensus(
    current: &[LabelMapping],
    chosen_token: char,
) -> Option<Vec<LabelMapping>> {
    if current.len() < 2 || !current.iter().any(|m| m.token == chosen_token) {
        return None;
    }

    let mut entries: Vec<(String, String)> = current
        .iter()
        .map(|m| (m.label.clone(), m.description.clone()))
        .collect();
    entries.rotate_right(1);

    Some(assign_tokens(entries))
}

/// Find the mapping whose token matches a model response.
pub fn find_by_token<'a>(mappings: &'a [LabelMapping], response: &str) -> Option<&'a LabelMapping> {
    let mut chars = response.chars();
    let token = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    mappings.iter().find(|m| m.token == token)
}

/// Option list for the system prompt, one `TOKEN: description` per line.
pub fn render_mappings(mappings: &[LabelMapping]) -> String {
    mappings
        .iter()
        .map(LabelMapping::render)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn labels(n: usize) -> BTreeMap<String, String> {
        (0..n)
            .map(|i| (format!("LABEL_{i}"), format!("description {i}")))
            .collect()
    }

    #[test]
    fn test_one_token_per_label() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [1, 2, 3, 7, 26] {
            let labels = labels(n);
            let mappings = mappings_from_labels(&labels, &mut rng).unwrap();

            let tokens: Vec<char> = mappings.iter().map(|m| m.token).collect();
            assert_eq!(tokens, TOKENS[..n].to_vec());

            let mut seen: Vec<&str> = mappings.iter().map(|m| m.label.as_str()).collect();
            seen.sort();
            let mut expected: Vec<&str> = labels.keys().map(String::as_str).collect();
            expected.sort();
            assert_eq!(seen, expected);

            for m in &mappings {
                assert_eq!(labels[&m.label], m.description);
            }
        }
    }

    #[test]
    fn test_too_many_labels() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(mappings_from_labels(&labels(27), &mut rng).is_err());
    }

    #[test]
    fn test_same_seed_same_mapping() {
        let labels = labels(6);
        let a = mappings_from_labels(&labels, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = mappings_from_labels(&labels, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_consensus_moves_every_label() {
        let mut rng = StdRng::seed_from_u64(3);
        let current = mappings_from_labels(&labels(4), &mut rng).unwrap();

        for chosen in &current {
            let next = next_mappings_for_consensus(&current, chosen.token).unwrap();
            let moved = next.iter().find(|m| m.label == chosen.label).unwrap();
            assert_ne!(moved.token, chosen.token);
            assert_eq!(next.len(), current.len());
        }
    }

    #[test]
    fn test_consensus_two_labels_swap() {
        let mut rng = StdRng::seed_from_u64(3);
        let current = mappings_from_labels(&labels(2), &mut rng).unwrap();
        let next = next_mappings_for_consensus(&current, 'A').unwrap();
        assert_eq!(next[0].label, current[1].label);
        assert_eq!(next[1].label, current[0].label);
    }

    #[test]
    fn test_consensus_not_possible() {
        let mut rng = StdRng::seed_from_u64(3);
        let single = mappings_from_labels(&labels(1), &mut rng).unwrap();
        assert!(next_mappings_for_consensus(&single, 'A').is_none());

        let pair = mappings_from_labels(&labels(2), &mut rng).unwrap();
        assert!(next_mappings_for_consensus(&pair, 'Z').is_none());
    }

    #[test]
    fn test_find_by_token() {
        let mut rng = StdRng::seed_from_u64(3);
        let mappings = mappings_from_labels(&labels(3), &mut rng).unwrap();
        assert_eq!(find_by_token(&mappings, "B").unwrap().token, 'B');
        assert!(find_by_token(&mappings, "D").is_none());
        assert!(find_by_token(&mappings, "AB").is_none());
        assert!(find_by_token(&mappings, "").is_none());
    }

    #[test]
    fn test_render_falls_back_to_label() {
        let m = LabelMapping {
            token: 'A',
            label: "POSITIVE".to_string(),
            description: String::new(),
        };
        assert_eq!(m.render(), "A: POSITIVE");
    }
}
