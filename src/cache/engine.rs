//! Set combination cache.
//!
//! Ensures a combined sorted set exists under its derived key, computing it
//! at most once per cache generation, and shortens or removes it once the
//! consuming read is done.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, instrument};

use crate::domain::query::{Aggregate, Operator};
use crate::domain::weighted_key::{BindElement, WeightedKey, normalize_all};
use crate::store::{KeyspaceStore, SortedSetStore, StoreError};

use super::config::CacheConfig;
use super::error::QueryError;
use super::keys::KeyHasher;

pub(crate) const METRIC_COMBINATION_CREATED: &str = "zcache_combination_created_total";
pub(crate) const METRIC_COMBINATION_HIT: &str = "zcache_combination_hit_total";
pub(crate) const METRIC_COMBINATION_MS: &str = "zcache_combination_ms";
pub(crate) const METRIC_CLEANUP_DELETED: &str = "zcache_cleanup_deleted_total";

/// Validated inputs and derived key of one combination, before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCombination {
    pub key: String,
    pub operator: Operator,
    pub sources: Vec<WeightedKey>,
}

impl PreparedCombination {
    /// True when more than one source set is involved.
    pub fn is_combination(&self) -> bool {
        self.sources.len() > 1
    }
}

/// Outcome of [`CombinationCache::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub key: String,
    pub created: bool,
    pub source_count: usize,
}

impl Combination {
    pub fn is_combination(&self) -> bool {
        self.source_count > 1
    }
}

#[derive(Clone)]
pub struct CombinationCache {
    store: Arc<dyn SortedSetStore>,
    hasher: KeyHasher,
    config: CacheConfig,
}

impl CombinationCache {
    pub fn new(store: Arc<dyn SortedSetStore>, hasher: KeyHasher, config: CacheConfig) -> Self {
        Self {
            store,
            hasher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SortedSetStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Normalise bind elements and derive the key. Pure.
    pub fn prepare(
        &self,
        elements: &[BindElement],
        operator: Operator,
        thread_local: bool,
    ) -> Result<PreparedCombination, QueryError> {
        let sources = normalize_all(elements)?;
        let key = self.hasher.derive(&sources, operator, thread_local)?;
        Ok(PreparedCombination {
            key,
            operator,
            sources,
        })
    }

    /// Make sure the combined set is present at `prepared.key`.
    ///
    /// A single source is never written. Otherwise the store is combined and
    /// capped in one batch when the key is absent or `cachebust` is set.
    #[instrument(skip(self, prepared), fields(key = %prepared.key))]
    pub async fn ensure(
        &self,
        prepared: &PreparedCombination,
        aggregate: Aggregate,
        cachebust: bool,
    ) -> Result<Combination, StoreError> {
        let source_count = prepared.sources.len();
        if !prepared.is_combination() {
            return Ok(Combination {
                key: prepared.key.clone(),
                created: false,
                source_count,
            });
        }

        if !cachebust && self.store.exists(&prepared.key).await? {
            counter!(METRIC_COMBINATION_HIT).increment(1);
            debug!(key = %prepared.key, "Combination cache hit");
            return Ok(Combination {
                key: prepared.key.clone(),
                created: false,
                source_count,
            });
        }

        let started_at = Instant::now();
        self.store
            .combine_and_expire(
                &prepared.key,
                prepared.operator,
                &prepared.sources,
                aggregate,
                self.config.max_cache_seconds_non_zero().get(),
            )
            .await?;
        histogram!(METRIC_COMBINATION_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_COMBINATION_CREATED).increment(1);
        debug!(
            key = %prepared.key,
            operator = %prepared.operator,
            aggregate = %aggregate,
            source_count,
            cachebust,
            "Combination written"
        );

        Ok(Combination {
            key: prepared.key.clone(),
            created: true,
            source_count,
        })
    }

    /// Normalise, derive and ensure in one call.
    pub async fn ensure_combination(
        &self,
        elements: &[BindElement],
        operator: Operator,
        aggregate: Aggregate,
        cachebust: bool,
        thread_local: bool,
    ) -> Result<Combination, QueryError> {
        let prepared = self.prepare(elements, operator, thread_local)?;
        Ok(self.ensure(&prepared, aggregate, cachebust).await?)
    }

    /// Apply the caller's ttl to an entry this call created.
    ///
    /// `ttl == 0` deletes it; otherwise the ttl is capped. Entries that were
    /// already cached keep their expiry.
    pub async fn release(&self, combination: &Combination, ttl: u64) -> Result<(), StoreError> {
        if !combination.created {
            return Ok(());
        }
        if ttl == 0 {
            self.store.delete(&combination.key).await?;
            counter!(METRIC_CLEANUP_DELETED).increment(1);
            debug!(key = %combination.key, "Deleted ephemeral combination");
        } else {
            self.extend(combination, ttl).await?;
        }
        Ok(())
    }

    /// Set the capped ttl on a combination regardless of who created it.
    pub(crate) async fn extend(&self, combination: &Combination, ttl: u64) -> Result<(), StoreError> {
        let seconds = self.config.capped_ttl(ttl);
        self.store.expire(&combination.key, seconds).await?;
        debug!(key = %combination.key, seconds, "Applied combination ttl");
        Ok(())
    }
}
