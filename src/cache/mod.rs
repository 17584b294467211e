//! Set-algebra cache engine.
//!
//! Combines named sorted sets into a cached result under a deterministic
//! key and serves count, range and raw-key reads against it:
//!
//! - **Key hasher** (`keys`): order-independent key derivation with an
//!   optional execution-context suffix
//! - **Combination cache** (`engine`): at most one store-side combination
//!   per cache generation, capped lifetime
//! - **Query layer** (`query`): validation, ttl/cleanup, race retry
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_cache_seconds = 300
//! max_retries = 2
//! key_prefix = "ZCACHE"
//! thread_local = false
//! ```

mod config;
mod engine;
mod error;
mod keys;
mod query;

pub use config::CacheConfig;
pub use engine::{Combination, CombinationCache, PreparedCombination};
pub use error::QueryError;
pub use keys::{ContextIdentity, HostProcessTask, KeyHasher, RandomIdentity};
pub use query::{FetchOutcome, Query, SetQueries};

pub(crate) use engine::{
    METRIC_CLEANUP_DELETED, METRIC_COMBINATION_CREATED, METRIC_COMBINATION_HIT,
    METRIC_COMBINATION_MS,
};
pub(crate) use query::{METRIC_RACE_EXHAUSTED, METRIC_RACE_RETRY};
