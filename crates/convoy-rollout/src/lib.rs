//! Convoy deployment reconciliation.
//!
//! Diffs the units a job needs against what the cluster has loaded, one
//! scaling group at a time, and drives a [`Scheduler`](convoy_scheduler::Scheduler)
//! through destroy, wait and start phases. Nothing is persisted between
//! runs; every run derives its plan from the job and the live inventory.
//!
//! # Components
//!
//! - **`plan`**: classification of loaded units into obsolete, modified,
//!   failed and new
//! - **`deployment`**: the run and destroy drivers
//! - **`wait`**: interruptible delays shared with the signal handler
//! - **`confirm`**: operator confirmation
//! - **`summary`**: change tables shown before acting

pub mod confirm;
pub mod deployment;
pub mod error;
pub mod options;
pub mod phase;
pub mod plan;
pub mod summary;
pub mod wait;

pub use confirm::{AutoConfirm, Confirmation, Confirmer};
pub use deployment::{Deployment, Outcome};
pub use error::{RolloutError, RolloutResult};
pub use options::RolloutOptions;
pub use phase::RolloutPhase;
pub use plan::{SlicePlan, job_units};
pub use summary::{ChangeAction, ChangeRow, ChangeSummary};
pub use wait::{Interrupt, WaitError, WaitOutcome, Waiter};
