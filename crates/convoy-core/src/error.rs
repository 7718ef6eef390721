//! Validation error types for the job model.

use thiserror::Error;

/// Result type alias for job model validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors raised while validating a job or cluster description.
///
/// Validation errors are never retried; they abort whatever build or
/// load step produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid name '{0}': must match [a-z0-9_] and be 1-48 characters")]
    InvalidName(String),

    #[error("invalid image '{image}': {reason}")]
    InvalidImage { image: String, reason: String },

    #[error("invalid link name '{0}': expected <group>.<task> or <job>.<group>.<task>")]
    InvalidLinkName(String),

    #[error("{context}: duplicate {kind} '{name}'")]
    Duplicate {
        context: String,
        kind: &'static str,
        name: String,
    },

    #[error("{context}: unknown task '{name}'")]
    UnknownTask { context: String, name: String },

    #[error("{context}: task cannot reference itself")]
    SelfReference { context: String },

    #[error("{context}: duplicate constraint on attribute '{attribute}'")]
    DuplicateConstraint { context: String, attribute: String },

    #[error("{context}: unknown constraint attribute '{attribute}'")]
    UnknownConstraint { context: String, attribute: String },

    #[error("{context}: count must be at least 1")]
    InvalidCount { context: String },

    #[error("{context}: {reason}")]
    Invalid { context: String, reason: String },

    #[error("unknown variable '${{{0}}}'")]
    UnknownVariable(String),

    #[error("unterminated variable in '{0}'")]
    UnterminatedVariable(String),
}

impl ValidationError {
    pub(crate) fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
