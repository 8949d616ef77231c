//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// The first three variants are the taxonomy every caller translates into a
/// response: `NotFound` (the entity does not exist *within the resolved
/// scope*), `Forbidden` (the operation breaks a domain invariant) and
/// `Unauthorized` (the principal lacks the right to act at all).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Referenced entity does not exist in the caller's scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation violates a domain invariant.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The principal is not allowed to perform the action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The backing store or cache failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
