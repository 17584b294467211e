//! Query layer over the combination cache.
//!
//! Every call follows the same path: validate, ensure the combination, read,
//! apply the caller's ttl (or delete), and for range reads over a real
//! combination retry a bounded number of times when the read comes back
//! empty, since that usually means the entry expired between the existence
//! check and the read.

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::query::{Aggregate, Operator, ScoreBound, ScoreRange, SortOrder};
use crate::domain::range::{Page, RangeItems};
use crate::domain::weighted_key::BindElement;
use crate::store::{SortedSetStore, StoreError};

use super::engine::{Combination, CombinationCache, PreparedCombination};
use super::error::QueryError;

pub(crate) const METRIC_RACE_RETRY: &str = "zcache_race_retry_total";
pub(crate) const METRIC_RACE_EXHAUSTED: &str = "zcache_race_exhausted_total";

/// A cached query against one or more sorted sets.
///
/// Defaults: highest score first, union with `MAX` aggregation, `ttl = 0`
/// (drop the combination after the call) and the configured retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub bind: Vec<BindElement>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub min_score: Option<ScoreBound>,
    pub max_score: Option<ScoreBound>,
    pub count: bool,
    pub reverse: bool,
    pub with_scores: bool,
    pub operator: Operator,
    pub ttl: u64,
    pub return_key: bool,
    pub aggregate: Aggregate,
    pub retries: Option<u32>,
    pub thread_local: Option<bool>,
    pub cachebust: bool,
}

impl Query {
    pub fn new<I, E>(bind: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<BindElement>,
    {
        Self {
            bind: bind.into_iter().map(Into::into).collect(),
            start: None,
            end: None,
            min_score: None,
            max_score: None,
            count: false,
            reverse: true,
            with_scores: false,
            operator: Operator::Union,
            ttl: 0,
            return_key: false,
            aggregate: Aggregate::Max,
            retries: None,
            thread_local: None,
            cachebust: false,
        }
    }

    /// Inclusive rank window; `(0, -1)` is the whole set.
    pub fn window(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn min_score(mut self, bound: impl Into<ScoreBound>) -> Self {
        self.min_score = Some(bound.into());
        self
    }

    pub fn max_score(mut self, bound: impl Into<ScoreBound>) -> Self {
        self.max_score = Some(bound.into());
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn return_key(mut self) -> Self {
        self.return_key = true;
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_scores(mut self, with_scores: bool) -> Self {
        self.with_scores = with_scores;
        self
    }

    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn thread_local(mut self, thread_local: bool) -> Self {
        self.thread_local = Some(thread_local);
        self
    }

    pub fn cachebust(mut self, cachebust: bool) -> Self {
        self.cachebust = cachebust;
        self
    }

    pub fn score_range(&self) -> Option<ScoreRange> {
        ScoreRange::from_bounds(self.min_score, self.max_score)
    }

    fn order(&self) -> SortOrder {
        SortOrder::from_reverse(self.reverse)
    }
}

/// Result of [`SetQueries::fetch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FetchOutcome {
    Count(u64),
    Key(String),
    Items(RangeItems),
}

/// Count, range and raw-key access to cached combinations.
#[derive(Clone)]
pub struct SetQueries {
    cache: CombinationCache,
}

impl SetQueries {
    pub fn new(cache: CombinationCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CombinationCache {
        &self.cache
    }

    /// Dispatch on the `count` / `return_key` flags after checking that
    /// they make sense together. Nothing touches the store on a validation
    /// failure.
    #[instrument(skip(self, query), fields(bind_len = query.bind.len()))]
    pub async fn fetch(&self, query: &Query) -> Result<FetchOutcome, QueryError> {
        validate_fetch(query)?;
        if query.count {
            return Ok(FetchOutcome::Count(self.count(query).await?));
        }
        if query.return_key {
            return Ok(FetchOutcome::Key(self.combination_key(query).await?));
        }
        Ok(FetchOutcome::Items(self.range(query).await?))
    }

    /// Total members, or members inside the score band when one is given.
    #[instrument(skip(self, query), fields(bind_len = query.bind.len()))]
    pub async fn count(&self, query: &Query) -> Result<u64, QueryError> {
        let prepared = self.prepare(query)?;
        let combination = self
            .cache
            .ensure(&prepared, query.aggregate, query.cachebust)
            .await?;

        let store = self.cache.store();
        let counted = match query.score_range() {
            Some(range) => store.count_in(&combination.key, &range).await,
            None => store.card(&combination.key).await,
        };
        self.cache.release(&combination, query.ttl).await?;
        Ok(counted?)
    }

    /// Rank- or score-addressed read with bounded race retry.
    ///
    /// Without an explicit window the whole range is read.
    #[instrument(skip(self, query), fields(bind_len = query.bind.len()))]
    pub async fn range(&self, query: &Query) -> Result<RangeItems, QueryError> {
        let start = query.start.unwrap_or(0);
        let end = query.end.unwrap_or(-1);
        let score_range = query.score_range();
        if score_range.is_some() {
            validate_score_window(start, end)?;
        }
        let prepared = self.prepare(query)?;
        let budget = query.retries.unwrap_or(self.cache.config().max_retries);

        let mut attempt: u32 = 0;
        loop {
            let combination = self
                .cache
                .ensure(&prepared, query.aggregate, query.cachebust)
                .await?;
            let read = self
                .read_range(&combination, start, end, score_range.as_ref(), query)
                .await;
            self.cache.release(&combination, query.ttl).await?;
            let items = read?;

            if !items.is_empty() || !combination.is_combination() {
                return Ok(items);
            }
            if attempt >= budget {
                counter!(METRIC_RACE_EXHAUSTED).increment(1);
                warn!(
                    key = %combination.key,
                    attempts = attempt + 1,
                    "Combination read stayed empty after exhausting retries"
                );
                return Ok(items);
            }
            attempt += 1;
            counter!(METRIC_RACE_RETRY).increment(1);
            info!(
                key = %combination.key,
                attempt,
                budget,
                "Empty combination read, retrying"
            );
        }
    }

    /// Ensure the combination and hand back its key for direct use.
    ///
    /// The capped ttl is applied to combinations so the key expires within
    /// `ttl` seconds. A single source is its own key and is left alone.
    #[instrument(skip(self, query), fields(bind_len = query.bind.len()))]
    pub async fn combination_key(&self, query: &Query) -> Result<String, QueryError> {
        if query.ttl == 0 {
            return Err(QueryError::validation(
                "return_key requires a ttl greater than zero",
            ));
        }
        let prepared = self.prepare(query)?;
        let combination = self
            .cache
            .ensure(&prepared, query.aggregate, query.cachebust)
            .await?;
        if combination.is_combination() {
            self.cache.extend(&combination, query.ttl).await?;
        }
        Ok(combination.key)
    }

    fn prepare(&self, query: &Query) -> Result<PreparedCombination, QueryError> {
        let thread_local = query
            .thread_local
            .unwrap_or(self.cache.config().thread_local);
        self.cache.prepare(&query.bind, query.operator, thread_local)
    }

    async fn read_range(
        &self,
        combination: &Combination,
        start: i64,
        end: i64,
        score_range: Option<&ScoreRange>,
        query: &Query,
    ) -> Result<RangeItems, StoreError> {
        let store = self.cache.store();
        match score_range {
            None => {
                store
                    .range_by_rank(&combination.key, start, end, query.order(), query.with_scores)
                    .await
            }
            Some(range) => {
                store
                    .range_by_score(
                        &combination.key,
                        range,
                        query.order(),
                        Page::from_inclusive(start, end),
                        query.with_scores,
                    )
                    .await
            }
        }
    }
}

fn validate_fetch(query: &Query) -> Result<(), QueryError> {
    let meta = query.count || query.return_key;
    let has_window = query.start.is_some() || query.end.is_some();
    if query.count && query.return_key {
        return Err(QueryError::validation(
            "count and return_key cannot both be set",
        ));
    }
    if meta && has_window {
        return Err(QueryError::validation(
            "count and return_key queries take no start/end",
        ));
    }
    if !meta && (query.start.is_none() || query.end.is_none()) {
        return Err(QueryError::validation(
            "range queries require both start and end",
        ));
    }
    if query.return_key && query.score_range().is_some() {
        return Err(QueryError::validation(
            "return_key cannot be combined with score bounds",
        ));
    }
    if query.return_key && query.ttl == 0 {
        return Err(QueryError::validation(
            "return_key requires a ttl greater than zero",
        ));
    }
    Ok(())
}

/// In score mode `start`/`end` become offset/limit, so only the whole-range
/// sentinel may be negative.
fn validate_score_window(start: i64, end: i64) -> Result<(), QueryError> {
    if start == 0 && end == -1 {
        return Ok(());
    }
    if end < 0 || start < 0 {
        return Err(QueryError::validation(format!(
            "score range queries cannot use negative indexes ({start}, {end}) other than (0, -1)"
        )));
    }
    if end < start {
        return Err(QueryError::validation(format!(
            "score range window ({start}, {end}) is inverted: end must not be before start"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::KeyHasher;
    use crate::infra::memory::MemoryStore;
    use crate::store::KeyspaceStore;

    async fn queries() -> (Arc<MemoryStore>, SetQueries) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..20 {
            store
                .add("TWENTY", &i.to_string(), i as f64)
                .await
                .expect("seed");
        }
        for i in 0..10 {
            store.add("SET_A", &i.to_string(), i as f64).await.expect("seed");
            store
                .add("SET_B", &(i + 5).to_string(), i as f64)
                .await
                .expect("seed");
        }
        let cache = CombinationCache::new(store.clone(), KeyHasher::default(), CacheConfig::default());
        (store, SetQueries::new(cache))
    }

    #[test]
    fn fetch_flag_conflicts_are_rejected() {
        let both = Query::new(["a"]).count().return_key().ttl(5);
        assert!(validate_fetch(&both).is_err());

        let meta_with_window = Query::new(["a"]).count().window(0, 10);
        assert!(validate_fetch(&meta_with_window).is_err());

        let missing_window = Query::new(["a"]);
        assert!(validate_fetch(&missing_window).is_err());

        let key_with_scores = Query::new(["a"]).return_key().ttl(5).min_score(1.0);
        assert!(validate_fetch(&key_with_scores).is_err());

        let key_without_ttl = Query::new(["a"]).return_key();
        assert!(validate_fetch(&key_without_ttl).is_err());

        assert!(validate_fetch(&Query::new(["a"]).count()).is_ok());
        assert!(validate_fetch(&Query::new(["a"]).return_key().ttl(5)).is_ok());
        assert!(validate_fetch(&Query::new(["a"]).window(0, -1)).is_ok());
    }

    #[test]
    fn score_window_rules() {
        assert!(validate_score_window(0, -1).is_ok());
        assert!(validate_score_window(0, 0).is_ok());
        assert!(validate_score_window(3, 9).is_ok());
        assert!(validate_score_window(0, -2).is_err());
        assert!(validate_score_window(-1, 5).is_err());
        assert!(validate_score_window(5, 3).is_err());
    }

    #[tokio::test]
    async fn rank_mode_reads_descending_by_default() {
        let (_, queries) = queries().await;
        let items = queries
            .range(&Query::new(["TWENTY"]).window(0, 2))
            .await
            .expect("range");
        assert_eq!(items.members(), vec!["19", "18", "17"]);
    }

    #[tokio::test]
    async fn score_mode_pages_after_filtering() {
        let (_, queries) = queries().await;
        let query = Query::new(["TWENTY"])
            .window(2, 4)
            .min_score(5.0)
            .max_score(15.0)
            .reverse(false);
        let items = queries.range(&query).await.expect("range");
        assert_eq!(items.members(), vec!["7", "8", "9"]);
    }

    #[tokio::test]
    async fn score_mode_window_to_max_index_reads_everything() {
        let (_, queries) = queries().await;
        let query = Query::new(["TWENTY"])
            .window(0, i64::MAX)
            .min_score(5.0)
            .max_score(15.0)
            .reverse(false);
        let items = queries.range(&query).await.expect("range");
        let members = items.members();
        assert_eq!(members.len(), 11);
        assert_eq!(members.first().copied(), Some("5"));
        assert_eq!(members.last().copied(), Some("15"));
    }

    #[tokio::test]
    async fn inverted_score_window_names_the_problem() {
        let (_, queries) = queries().await;
        let query = Query::new(["TWENTY"]).window(5, 3).min_score(0.0);
        let err = queries.range(&query).await.expect_err("must fail");
        assert!(err.is_validation());
        assert!(err.to_string().contains("inverted"), "{err}");
    }

    #[tokio::test]
    async fn score_mode_reverse_swaps_bounds() {
        let (_, queries) = queries().await;
        let query = Query::new(["TWENTY"])
            .window(0, -1)
            .min_score(ScoreBound::Exclusive(16.0))
            .max_score(ScoreBound::PosInfinity);
        let items = queries.range(&query).await.expect("range");
        assert_eq!(items.members(), vec!["19", "18", "17"]);
    }

    #[tokio::test]
    async fn negative_score_window_fails_without_io() {
        let (store, queries) = queries().await;
        let query = Query::new(["SET_A", "SET_B"])
            .window(0, -5)
            .min_score(0.0);
        let err = queries.range(&query).await.expect_err("must fail");
        assert!(err.is_validation());
        assert_eq!(store.combination_count(), 0);
    }

    #[tokio::test]
    async fn count_uses_band_when_given() {
        let (_, queries) = queries().await;
        let total = queries.count(&Query::new(["TWENTY"])).await.expect("count");
        assert_eq!(total, 20);
        let band = queries
            .count(&Query::new(["TWENTY"]).min_score(ScoreBound::Exclusive(4.0)).max_score(9.0))
            .await
            .expect("count");
        assert_eq!(band, 5);
    }

    #[tokio::test]
    async fn ephemeral_count_leaves_nothing_behind() {
        let (store, queries) = queries().await;
        let query = Query::new(["SET_A", "SET_B"]).operator(Operator::Intersect);
        assert_eq!(queries.count(&query).await.expect("count"), 5);
        assert!(store.keys().iter().all(|key| !key.starts_with("ZCACHE:")));
    }

    #[tokio::test]
    async fn return_key_applies_ttl_to_existing_entry() {
        let (store, queries) = queries().await;
        let warm = Query::new(["SET_A", "SET_B"]).ttl(300);
        assert_eq!(queries.count(&warm).await.expect("count"), 15);

        let key = queries
            .combination_key(&Query::new(["SET_B", "SET_A"]).ttl(5))
            .await
            .expect("key");
        assert_eq!(key, "ZCACHE:(SET_A*1.0 || SET_B*1.0)");
        let ttl = store.ttl(&key).await.expect("ttl").expect("expiry");
        assert!(ttl <= 5);
        assert_eq!(store.combination_count(), 1);
    }

    #[tokio::test]
    async fn return_key_for_single_set_keeps_it_persistent() {
        let (store, queries) = queries().await;
        let outcome = queries
            .fetch(&Query::new(["TWENTY"]).return_key().ttl(5))
            .await
            .expect("fetch");
        assert_eq!(outcome, FetchOutcome::Key("TWENTY".into()));
        assert_eq!(store.ttl("TWENTY").await.expect("ttl"), None);
    }

    #[tokio::test]
    async fn single_set_empty_read_is_not_retried() {
        let (store, queries) = queries().await;
        store.evict_after_next_exists(3);
        let items = queries
            .range(&Query::new(["MISSING"]).window(0, -1))
            .await
            .expect("range");
        assert!(items.is_empty());
        assert_eq!(store.pending_evictions(), 3);
    }
}
