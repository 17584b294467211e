//! Multi-level sort scores packed into a single float.
//!
//! Sorted sets order ascending by score, so an ascending component is added
//! and a descending one subtracted. Each level is shifted left by
//! `band_width`, which must exceed the largest component value for the
//! levels not to bleed into each other.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const DEFAULT_BAND_WIDTH: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DomainError::validation(format!(
                "unknown sort direction `{other}`"
            ))),
        }
    }
}

/// Fold `(subscore, direction)` pairs, most significant first, into one score.
pub fn compute_compound_score(components: &[(f64, SortDirection)], band_width: f64) -> f64 {
    components
        .iter()
        .fold(0.0, |score, &(component, direction)| {
            let shifted = score * band_width;
            match direction {
                SortDirection::Asc => shifted + component,
                SortDirection::Desc => shifted - component,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::SortDirection::{Asc, Desc};
    use super::*;

    fn ordered(mut rows: Vec<(&'static str, Vec<(f64, SortDirection)>)>) -> Vec<&'static str> {
        rows.sort_by(|a, b| {
            let left = compute_compound_score(&a.1, DEFAULT_BAND_WIDTH);
            let right = compute_compound_score(&b.1, DEFAULT_BAND_WIDTH);
            left.total_cmp(&right)
        });
        rows.into_iter().map(|(name, _)| name).collect()
    }

    #[test]
    fn asc_then_desc_breaks_ties_descending() {
        let rows = vec![
            ("first", vec![(3.0, Asc), (4.0, Desc), (0.0, Desc)]),
            ("third", vec![(7.0, Asc), (5.0, Desc), (5.0, Desc)]),
            ("second", vec![(7.0, Asc), (5.0, Desc), (50.0, Desc)]),
        ];
        assert_eq!(ordered(rows), vec!["first", "second", "third"]);
    }

    #[test]
    fn desc_then_asc() {
        let rows = vec![
            ("third", vec![(3.0, Desc), (4.0, Asc)]),
            ("first", vec![(7.0, Desc), (5.0, Asc)]),
            ("second", vec![(7.0, Desc), (10.0, Asc)]),
        ];
        assert_eq!(ordered(rows), vec!["first", "second", "third"]);
    }

    #[test]
    fn primary_component_dominates() {
        let rows = vec![
            ("third", vec![(4.0, Desc), (3.0, Desc)]),
            ("second", vec![(5.0, Desc), (7.0, Desc)]),
            ("first", vec![(10.0, Desc), (7.0, Desc)]),
        ];
        assert_eq!(ordered(rows), vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_components_score_zero() {
        assert_eq!(compute_compound_score(&[], DEFAULT_BAND_WIDTH), 0.0);
        assert_eq!(compute_compound_score(&[(7.0, Asc)], 10.0), 7.0);
        assert_eq!(compute_compound_score(&[(1.0, Asc), (2.0, Desc)], 10.0), 8.0);
    }
}
