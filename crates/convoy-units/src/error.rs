//! Unit builder error types.

use convoy_core::ValidationError;
use thiserror::Error;

/// Errors raised while building the units of a scaling group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("scaling group must be at least 1")]
    InvalidScalingGroup,

    #[error(
        "{context}: scaling group {scaling_group} has no global instance constraint ({pool} configured)"
    )]
    ConstraintPoolExhausted {
        context: String,
        scaling_group: u32,
        pool: usize,
    },

    #[error("{context}: cannot encode registration record: {reason}")]
    Registration { context: String, reason: String },
}

pub type BuildResult<T> = Result<T, BuildError>;
