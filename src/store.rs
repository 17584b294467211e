//! Store traits describing the external ordered-set and bitmap engine.
//!
//! Every method is one round trip. Implementations must give
//! [`SortedSetStore::combine_and_expire`] and [`BitmapStore::assign_offset`]
//! all-or-nothing semantics; nothing else is expected to be atomic.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::query::{Aggregate, Operator, ScoreRange, SortOrder};
use crate::domain::range::{Page, RangeItems};
use crate::domain::weighted_key::WeightedKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {message}")]
    Connection { message: String },
    #[error("store command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("unexpected store reply: {message}")]
    Protocol { message: String },
    #[error("store timeout")]
    Timeout,
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Key lifecycle operations shared by every value type.
#[async_trait]
pub trait KeyspaceStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining lifetime in seconds; `None` for a missing or persistent key.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;
}

#[async_trait]
pub trait SortedSetStore: KeyspaceStore {
    /// Union or intersect `sources` into `dest` and cap its lifetime, as one batch.
    ///
    /// An empty result leaves `dest` absent.
    async fn combine_and_expire(
        &self,
        dest: &str,
        operator: Operator,
        sources: &[WeightedKey],
        aggregate: Aggregate,
        expire_seconds: u64,
    ) -> Result<(), StoreError>;

    async fn card(&self, key: &str) -> Result<u64, StoreError>;

    async fn count_in(&self, key: &str, range: &ScoreRange) -> Result<u64, StoreError>;

    /// Rank-addressed read, `stop` inclusive, negative indexes count from the end.
    async fn range_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: SortOrder,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError>;

    async fn range_by_score(
        &self,
        key: &str,
        range: &ScoreRange,
        order: SortOrder,
        page: Option<Page>,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError>;

    /// Returns true when the member was new.
    async fn add(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError>;

    async fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait BitmapStore: KeyspaceStore {
    /// Look `id` up in `id_to_offset`, allocating the next dense offset from
    /// `counter` (and recording both directions) when it is unseen.
    async fn assign_offset(
        &self,
        id_to_offset: &str,
        offset_to_id: &str,
        counter: &str,
        id: &str,
    ) -> Result<u64, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn counter(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Returns the previous bit.
    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError>;

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool, StoreError>;

    async fn bit_count(&self, key: &str) -> Result<u64, StoreError>;

    /// OR `sources` into `dest`, returning the resulting length in bytes.
    async fn bit_or(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError>;
}
