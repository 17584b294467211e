use thiserror::Error;

use crate::domain::error::DomainError;
use crate::store::StoreError;

/// Failure of a cached query.
///
/// Validation failures are raised before any store I/O. Store failures are
/// passed through untouched and never retried.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(DomainError::validation(message))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
