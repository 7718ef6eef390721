//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by scheduler backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The unit or resource does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or API flakiness. Retried with backoff.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend refused the request.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// Several concurrent operations failed.
    #[error("{} operations failed: {}", .0.len(), join(.0))]
    Aggregate(Vec<SchedulerError>),

    #[error("invalid unit {name}: {reason}")]
    InvalidUnit { name: String, reason: String },

    #[error("backend configuration error: {0}")]
    Config(String),
}

fn join(errors: &[SchedulerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchedulerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Fold a list of errors into one, or `Ok` when empty.
    pub fn collect(mut errors: Vec<SchedulerError>) -> SchedulerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_folds_errors() {
        assert_eq!(SchedulerError::collect(vec![]), Ok(()));

        let one = SchedulerError::NotFound("a.service".into());
        assert_eq!(SchedulerError::collect(vec![one.clone()]), Err(one));

        let err = SchedulerError::collect(vec![
            SchedulerError::Transient("reset".into()),
            SchedulerError::NotFound("b.service".into()),
        ])
        .unwrap_err();
        assert!(matches!(&err, SchedulerError::Aggregate(list) if list.len() == 2));
        assert_eq!(
            err.to_string(),
            "2 operations failed: transient backend error: reset; not found: b.service"
        );
    }

    #[test]
    fn only_transient_errors_are_transient() {
        assert!(SchedulerError::Transient("x".into()).is_transient());
        assert!(!SchedulerError::NotFound("x".into()).is_transient());
        assert!(
            !SchedulerError::Rejected {
                status: 400,
                message: "bad".into()
            }
            .is_transient()
        );
    }
}
