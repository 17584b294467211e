//! Store adapters and runtime bootstrap.

pub mod error;
pub(crate) mod lock;
pub mod memory;
pub mod redis;
pub mod telemetry;
