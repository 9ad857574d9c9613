//! Error types shared by the core vocabulary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A tilted time window definition string could not be parsed.
    #[error("invalid tilted time window definition: {0}")]
    InvalidTtwDefinition(String),

    /// A constraint group was empty.
    #[error("constraint group may not be empty")]
    InvalidConstraint,

    /// A serialized value did not match the expected shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Internal corruption was detected. The owning engine must be
    /// discarded: further appends would silently corrupt history.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
