//! Range read results and paging.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Members returned by a range read, with or without their scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RangeItems {
    Members(Vec<String>),
    WithScores(Vec<ScoredMember>),
}

impl RangeItems {
    pub fn empty(with_scores: bool) -> Self {
        if with_scores {
            RangeItems::WithScores(Vec::new())
        } else {
            RangeItems::Members(Vec::new())
        }
    }

    /// Build from scored members, dropping scores unless requested.
    pub fn from_scored(items: Vec<ScoredMember>, with_scores: bool) -> Self {
        if with_scores {
            RangeItems::WithScores(items)
        } else {
            RangeItems::Members(items.into_iter().map(|item| item.member).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RangeItems::Members(items) => items.len(),
            RangeItems::WithScores(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn members(&self) -> Vec<&str> {
        match self {
            RangeItems::Members(items) => items.iter().map(String::as_str).collect(),
            RangeItems::WithScores(items) => items.iter().map(|item| item.member.as_str()).collect(),
        }
    }
}

/// Offset/limit window applied to score-addressed reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    /// Translate an inclusive rank window into offset/limit.
    ///
    /// `(0, -1)` means the whole range and yields `None`. Any other negative
    /// bound has no inclusive meaning here and is rejected by callers before
    /// this point; `None` is returned for it as well. A window reaching past
    /// `i64::MAX` members is clamped there, the largest `LIMIT` the store takes.
    pub fn from_inclusive(start: i64, end: i64) -> Option<Self> {
        if start == 0 && end == -1 {
            return None;
        }
        if start < 0 || end < start {
            return None;
        }
        Some(Self {
            offset: start as u64,
            limit: end
                .checked_sub(start)
                .and_then(|span| span.checked_add(1))
                .unwrap_or(i64::MAX) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_range_sentinel_has_no_page() {
        assert_eq!(Page::from_inclusive(0, -1), None);
    }

    #[test]
    fn open_ended_window_clamps_limit() {
        assert_eq!(
            Page::from_inclusive(0, i64::MAX),
            Some(Page {
                offset: 0,
                limit: i64::MAX as u64
            })
        );
        assert_eq!(
            Page::from_inclusive(10, i64::MAX),
            Some(Page {
                offset: 10,
                limit: (i64::MAX - 9) as u64
            })
        );
    }

    #[test]
    fn inclusive_window_becomes_offset_limit() {
        assert_eq!(
            Page::from_inclusive(5, 7),
            Some(Page {
                offset: 5,
                limit: 3
            })
        );
        assert_eq!(
            Page::from_inclusive(0, 0),
            Some(Page {
                offset: 0,
                limit: 1
            })
        );
    }

    #[test]
    fn scores_are_dropped_unless_requested() {
        let scored = vec![ScoredMember {
            member: "a".into(),
            score: 1.0,
        }];
        let items = RangeItems::from_scored(scored.clone(), false);
        assert_eq!(items, RangeItems::Members(vec!["a".into()]));
        let items = RangeItems::from_scored(scored, true);
        assert_eq!(items.members(), vec!["a"]);
        assert!(RangeItems::empty(true).is_empty());
    }
}
