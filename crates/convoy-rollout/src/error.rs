//! Rollout error types.

use convoy_scheduler::SchedulerError;
use convoy_units::BuildError;
use thiserror::Error;

use crate::phase::RolloutPhase;
use crate::wait::WaitError;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("cannot build units for scaling group {scaling_group}: {source}")]
    Build {
        scaling_group: u32,
        #[source]
        source: BuildError,
    },

    #[error("{phase} failed: {source}")]
    Scheduler {
        phase: RolloutPhase,
        #[source]
        source: SchedulerError,
    },

    /// Several concurrent steps failed.
    #[error("{} steps failed: {}", .0.len(), join(.0))]
    Aggregate(Vec<RolloutError>),

    #[error("interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Wait(WaitError),
}

fn join(errors: &[RolloutError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RolloutError {
    pub(crate) fn scheduler(phase: RolloutPhase) -> impl Fn(SchedulerError) -> Self {
        move |source| Self::Scheduler { phase, source }
    }

    /// Fold a list of errors into one, or `Ok` when empty.
    pub fn collect(mut errors: Vec<RolloutError>) -> RolloutResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

impl From<WaitError> for RolloutError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Aborted => Self::Interrupted,
            other => Self::Wait(other),
        }
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
