use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    cache::QueryError, domain::error::DomainError, infra::error::InfraError, store::StoreError,
};

/// Error chain flattened for structured logging.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// True for failures caused by the caller's input rather than the store.
    pub fn is_validation(&self) -> bool {
        match self {
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => true,
            AppError::Query(err) => err.is_validation(),
            AppError::Store(_) | AppError::Infra(_) | AppError::Unexpected(_) => false,
        }
    }

    /// Process exit status for the binary: 2 for bad input, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_validation() { 2 } else { 1 }
    }
}
