//! Pure value types shared by the cache engine, its store adapters, and the
//! collaborators built on top of it.

pub mod error;
pub mod granularity;
pub mod query;
pub mod range;
pub mod score;
pub mod weighted_key;
