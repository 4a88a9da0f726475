//! Numeric range mapping for grading heads.

use crate::models::{EvalError, Result};

/// Result of [`map_number_range`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedNumber {
    pub value: f64,
    /// The interpolated value fell outside the target range and was pinned
    /// to the nearest bound.
    pub clamped: bool,
}

/// Linearly map `value` from `[from_min, from_max]` onto `[to_min, to_max]`.
///
/// Results outside the target range are clamped and flagged, never
/// extrapolated.
pub fn map_number_range(
    value: f64,
    from_min: f64,
    from_max: f64,
    to_min: f64,
    to_max: f64,
) -> Result<MappedNumber> {
    if from_min >= from_max {
        return Err(EvalError::InvalidConfig(format!(
            "source range [{from_min}, {from_max}] is empty"
        )));
    }
    if to_min >= to_max {
        return Err(EvalError::InvalidConfig(format!(
            "target range [{to_min}, {to_max}] is empty"
        )));
    }

    let mapped = (value - from_min) / (from_max - from_min) * (to_max - to_min) + to_min;
    let clamped = mapped.clamp(to_min, to_max);
    Ok(MappedNumber {
        value: clamped,
        clamped: clamped != mapped,
    })
}

/// Parse a model response as a number.
///
/// Integers and decimals are accepted; NaN and infinities are not.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(i as f64);
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_interpolation() {
        let m = map_number_range(3.0, 1.0, 5.0, 1.0, 100.0).unwrap();
        assert!((m.value - 50.5).abs() < 1e-9);
        assert!(!m.clamped);

        let m = map_number_range(5.0, 1.0, 5.0, 1.0, 100.0).unwrap();
        assert_eq!(m.value, 100.0);
        assert!(!m.clamped);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let low = map_number_range(0.0, 1.0, 5.0, 1.0, 100.0).unwrap();
        assert_eq!(low.value, 1.0);
        assert!(low.clamped);

        let high = map_number_range(9.0, 1.0, 5.0, 1.0, 100.0).unwrap();
        assert_eq!(high.value, 100.0);
        assert!(high.clamped);
    }

    #[test]
    fn test_empty_ranges_rejected() {
        assert!(map_number_range(1.0, 5.0, 5.0, 1.0, 10.0).is_err());
        assert!(map_number_range(1.0, 1.0, 5.0, 10.0, 1.0).is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("3"), Some(3.0));
        assert_eq!(parse_number(" 4 \n"), Some(4.0));
        assert_eq!(parse_number("2.5"), Some(2.5));
        assert_eq!(parse_number("-1"), Some(-1.0));
        assert_eq!(parse_number("three"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
    }
}
