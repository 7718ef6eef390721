//! Phases of one scaling group slice.

use std::fmt;

/// Where a slice is in its reconciliation.
///
/// A slice moves `Planning → AwaitingConfirmation → Destroying → Waiting →
/// Starting → Done`. Confirmation is skipped when forced or when the slice
/// has no changes; slices without changes go straight to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    Planning,
    AwaitingConfirmation,
    Destroying,
    /// Interruptible delay between destroy and start, or between slices.
    Waiting,
    Starting,
    Done,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planning => "planning",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Destroying => "destroying",
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Done => "done",
        })
    }
}
