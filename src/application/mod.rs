//! Services built on top of the cache engine and the store traits.

pub mod error;
pub mod prefix_index;
pub mod unique_count;
