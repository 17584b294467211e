//! Cached set algebra over Redis sorted sets.
//!
//! Named sorted sets are combined (union or intersection, weighted) into a
//! cache entry under a deterministic key, and count, range and raw-key reads
//! are served against that entry with bounded lifetime and race retry.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod store;
