//! Prefix search over sorted sets.
//!
//! Every prefix of an indexed string gets its own sorted set holding the ids
//! that start with it. A multi-word query intersects the per-term sets
//! through the cached query layer, lowest score first, so shorter (closer)
//! matches come out ahead.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::cache::{FetchOutcome, Query, SetQueries};
use crate::domain::error::DomainError;
use crate::domain::query::Operator;
use crate::domain::range::RangeItems;
use crate::domain::score::{SortDirection, compute_compound_score};
use crate::store::SortedSetStore;

use super::error::AppError;

const DEFAULT_SCORE_BAND_WIDTH: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixIndexOptions {
    /// Put the string length ahead of the secondary scores.
    pub length_score: bool,
    pub key_separator: String,
    pub score_band_width: f64,
}

impl Default for PrefixIndexOptions {
    fn default() -> Self {
        Self {
            length_score: true,
            key_separator: ":".to_string(),
            score_band_width: DEFAULT_SCORE_BAND_WIDTH,
        }
    }
}

impl From<&crate::config::PrefixIndexSettings> for PrefixIndexOptions {
    fn from(settings: &crate::config::PrefixIndexSettings) -> Self {
        Self {
            length_score: settings.length_score,
            key_separator: settings.key_separator.clone(),
            score_band_width: settings.score_band_width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Add,
    Remove,
}

impl FromStr for PrefixOp {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(PrefixOp::Add),
            "rem" | "remove" => Ok(PrefixOp::Remove),
            other => Err(DomainError::validation(format!("unknown operator: {other}"))),
        }
    }
}

/// Paging and lifetime of a match query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWindow {
    pub start: i64,
    pub end: i64,
    pub with_scores: bool,
    pub ttl: u64,
}

impl Default for MatchWindow {
    fn default() -> Self {
        Self {
            start: 0,
            end: -1,
            with_scores: false,
            ttl: 0,
        }
    }
}

pub struct PrefixIndex {
    queries: SetQueries,
    store: Arc<dyn SortedSetStore>,
    index_name: String,
    options: PrefixIndexOptions,
}

impl PrefixIndex {
    pub fn new(queries: SetQueries, index_name: impl Into<String>, options: PrefixIndexOptions) -> Self {
        let store = queries.cache().store().clone();
        Self {
            queries,
            store,
            index_name: index_name.into(),
            options,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn prefix_key(&self, prefix: &str) -> String {
        format!("{}{}{}", self.index_name, self.options.key_separator, prefix)
    }

    /// Score stored with every prefix entry of `normalized`.
    pub fn score_for(&self, normalized: &str, secondary_scores: &[(f64, SortDirection)]) -> f64 {
        let length = normalized.chars().count() as f64;
        if secondary_scores.is_empty() {
            return length;
        }
        let mut components = Vec::with_capacity(secondary_scores.len() + 1);
        if self.options.length_score {
            components.push((length, SortDirection::Asc));
        }
        components.extend_from_slice(secondary_scores);
        compute_compound_score(&components, self.options.score_band_width)
    }

    /// Add `id` to (or remove it from) every prefix set of `search_string`
    /// at least `min_prefix_len` characters long.
    ///
    /// Returns the number of prefix sets touched; strings shorter than
    /// `min_prefix_len` are skipped.
    #[instrument(skip(self, secondary_scores), fields(index = %self.index_name))]
    pub async fn build(
        &self,
        search_string: &str,
        id: &str,
        min_prefix_len: usize,
        op: PrefixOp,
        secondary_scores: &[(f64, SortDirection)],
    ) -> Result<usize, AppError> {
        let min_prefix_len = min_prefix_len.max(1);
        if search_string.chars().count() < min_prefix_len {
            return Ok(0);
        }
        let normalized = search_string.trim().to_lowercase();
        let score = self.score_for(&normalized, secondary_scores);

        let boundaries: Vec<usize> = normalized
            .char_indices()
            .map(|(index, ch)| index + ch.len_utf8())
            .skip(min_prefix_len - 1)
            .collect();
        for &end in &boundaries {
            let key = self.prefix_key(&normalized[..end]);
            match op {
                PrefixOp::Add => {
                    debug!(id, key = %key, score, "Adding id to prefix set");
                    self.store.add(&key, id, score).await?;
                }
                PrefixOp::Remove => {
                    self.store.remove(&key, id).await?;
                }
            }
        }
        Ok(boundaries.len())
    }

    /// Ids whose indexed strings start with every whitespace-separated term
    /// of `search_string`, best match first.
    #[instrument(skip(self), fields(index = %self.index_name))]
    pub async fn matches(
        &self,
        search_string: &str,
        window: MatchWindow,
    ) -> Result<RangeItems, AppError> {
        let terms: Vec<String> = search_string
            .split_whitespace()
            .map(|term| self.prefix_key(&term.to_lowercase()))
            .collect();
        if terms.is_empty() {
            return Err(AppError::validation("search string has no terms"));
        }

        let query = Query::new(terms)
            .window(window.start, window.end)
            .operator(Operator::Intersect)
            .reverse(false)
            .with_scores(window.with_scores)
            .ttl(window.ttl);
        match self.queries.fetch(&query).await? {
            FetchOutcome::Items(items) => Ok(items),
            other => Err(AppError::unexpected(format!(
                "range query produced {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CombinationCache, KeyHasher};
    use crate::infra::memory::MemoryStore;

    fn index(store: Arc<MemoryStore>, options: PrefixIndexOptions) -> PrefixIndex {
        let cache = CombinationCache::new(store, KeyHasher::default(), CacheConfig::default());
        PrefixIndex::new(SetQueries::new(cache), "test_index", options)
    }

    #[test]
    fn operator_names() {
        assert_eq!("add".parse::<PrefixOp>().ok(), Some(PrefixOp::Add));
        assert_eq!("rem".parse::<PrefixOp>().ok(), Some(PrefixOp::Remove));
        assert!("upsert".parse::<PrefixOp>().is_err());
    }

    #[test]
    fn plain_length_score_without_secondaries() {
        let index = index(Arc::new(MemoryStore::new()), PrefixIndexOptions::default());
        assert_eq!(index.score_for("gustav", &[]), 6.0);
    }

    #[test]
    fn length_leads_secondary_scores() {
        let index = index(Arc::new(MemoryStore::new()), PrefixIndexOptions::default());
        let score = index.score_for("gus", &[(7.0, SortDirection::Desc)]);
        assert_eq!(score, 3.0 * 100_000.0 - 7.0);

        let without_length = index_with_length(false);
        assert_eq!(without_length.score_for("gus", &[(7.0, SortDirection::Desc)]), -7.0);
    }

    fn index_with_length(length_score: bool) -> PrefixIndex {
        index(
            Arc::new(MemoryStore::new()),
            PrefixIndexOptions {
                length_score,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn every_prefix_is_indexed() {
        let store = Arc::new(MemoryStore::new());
        let index = index(store.clone(), PrefixIndexOptions::default());
        let touched = index
            .build("Dagon", "beta", 2, PrefixOp::Add, &[])
            .await
            .expect("build");
        assert_eq!(touched, 4);
        assert_eq!(
            store.keys(),
            vec![
                "test_index:da",
                "test_index:dag",
                "test_index:dago",
                "test_index:dagon"
            ]
        );
    }

    #[tokio::test]
    async fn short_strings_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let index = index(store.clone(), PrefixIndexOptions::default());
        let touched = index
            .build("ab", "alpha", 3, PrefixOp::Add, &[])
            .await
            .expect("build");
        assert_eq!(touched, 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let index = index(Arc::new(MemoryStore::new()), PrefixIndexOptions::default());
        let err = index
            .matches("   ", MatchWindow::default())
            .await
            .expect_err("no terms");
        assert!(err.is_validation());
    }
}
