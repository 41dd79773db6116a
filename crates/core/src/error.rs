//! Validation error model.

use thiserror::Error;

/// Result type used by the pure (non-IO) layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failure to accept a caller-supplied value.
///
/// Keep this focused on deterministic input problems (bad topic patterns,
/// malformed identifiers). Transport and decode failures belong to the
/// crates that perform the IO.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. a malformed topic pattern).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
