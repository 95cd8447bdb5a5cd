//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Covers deterministic outcomes of administrative operations (validation,
/// existence, conflicts). Authorization denials and store failures have their
/// own types in the crates that produce them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty or too long).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The record being created already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The record being addressed does not exist.
    #[error("absent: {0}")]
    Absent(String),

    /// The operation conflicts with existing state (e.g. deleting a group
    /// that still manages other groups).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn absent(msg: impl Into<String>) -> Self {
        Self::Absent(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
