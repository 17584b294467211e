use thiserror::Error;

use crate::store::StoreError;

/// Failures while bringing the process up: configuration, logging and the
/// first store connection.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
