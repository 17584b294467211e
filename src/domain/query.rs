//! Query vocabulary shared by the cache engine and the store adapters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// How multiple sorted sets are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Union,
    Intersect,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Union => "union",
            Operator::Intersect => "intersect",
        }
    }

    /// Separator placed between `name*weight` chunks in a cache key.
    pub fn key_joiner(self) -> &'static str {
        match self {
            Operator::Union => " || ",
            Operator::Intersect => " && ",
        }
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(Operator::Union),
            "intersect" => Ok(Operator::Intersect),
            other => Err(DomainError::validation(format!("unknown operator `{other}`"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a member's scores merge when it appears in more than one source set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Max,
    Min,
    Sum,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
            Aggregate::Sum => "SUM",
        }
    }

    pub fn combine(self, left: f64, right: f64) -> f64 {
        match self {
            Aggregate::Max => left.max(right),
            Aggregate::Min => left.min(right),
            Aggregate::Sum => left + right,
        }
    }
}

impl FromStr for Aggregate {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Aggregate::Max),
            "min" => Ok(Aggregate::Min),
            "sum" => Ok(Aggregate::Sum),
            other => Err(DomainError::validation(format!("unknown aggregate `{other}`"))),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }

    pub fn is_descending(self) -> bool {
        matches!(self, SortOrder::Descending)
    }
}

/// One end of a score interval, in the store's native notation.
///
/// `5` is inclusive, `(5` is exclusive, `-inf` / `+inf` are unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInfinity,
    PosInfinity,
}

impl ScoreBound {
    /// True when `score` lies on the allowed side of this bound used as a minimum.
    pub fn admits_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(bound) => score >= bound,
            ScoreBound::Exclusive(bound) => score > bound,
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
        }
    }

    /// True when `score` lies on the allowed side of this bound used as a maximum.
    pub fn admits_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(bound) => score <= bound,
            ScoreBound::Exclusive(bound) => score < bound,
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
        }
    }
}

impl From<f64> for ScoreBound {
    fn from(value: f64) -> Self {
        if value == f64::INFINITY {
            ScoreBound::PosInfinity
        } else if value == f64::NEG_INFINITY {
            ScoreBound::NegInfinity
        } else {
            ScoreBound::Inclusive(value)
        }
    }
}

impl From<i64> for ScoreBound {
    fn from(value: i64) -> Self {
        ScoreBound::Inclusive(value as f64)
    }
}

impl FromStr for ScoreBound {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (exclusive, number) = match trimmed.strip_prefix('(') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        match number.to_ascii_lowercase().as_str() {
            "-inf" => return Ok(ScoreBound::NegInfinity),
            "+inf" | "inf" => return Ok(ScoreBound::PosInfinity),
            _ => {}
        }

        let parsed = number.parse::<f64>().map_err(|err| {
            DomainError::validation(format!("invalid score bound `{value}`: {err}"))
        })?;
        if parsed.is_nan() {
            return Err(DomainError::validation(format!(
                "invalid score bound `{value}`: NaN"
            )));
        }
        if exclusive {
            Ok(ScoreBound::Exclusive(parsed))
        } else {
            Ok(ScoreBound::from(parsed))
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBound::Inclusive(value) => write!(f, "{value}"),
            ScoreBound::Exclusive(value) => write!(f, "({value}"),
            ScoreBound::NegInfinity => f.write_str("-inf"),
            ScoreBound::PosInfinity => f.write_str("+inf"),
        }
    }
}

/// A score band with both ends resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: ScoreBound,
    pub max: ScoreBound,
}

impl ScoreRange {
    /// Fill a missing end with the matching infinity. `None` when neither end is given.
    pub fn from_bounds(min: Option<ScoreBound>, max: Option<ScoreBound>) -> Option<Self> {
        if min.is_none() && max.is_none() {
            return None;
        }
        Some(Self {
            min: min.unwrap_or(ScoreBound::NegInfinity),
            max: max.unwrap_or(ScoreBound::PosInfinity),
        })
    }

    pub fn contains(&self, score: f64) -> bool {
        self.min.admits_above(score) && self.max.admits_below(score)
    }
}
