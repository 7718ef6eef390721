//! Scheduler backends for convoy.
//!
//! The deployment engine talks to clusters only through the [`Scheduler`]
//! trait. Two implementations ship here: [`FleetScheduler`] for the fleet
//! HTTP API and [`MemoryScheduler`], an in-process inventory used for dry
//! runs and tests.

pub mod backend;
pub mod diff;
pub mod error;
pub mod events;
pub mod fleet;
pub mod memory;
pub mod retry;

pub use backend::{ChangeSet, Scheduler, StopStats, UnitState, connect};
pub use diff::diff_lines;
pub use error::{SchedulerError, SchedulerResult};
pub use events::{Event, Events, Reason, UnitAction};
pub use fleet::FleetScheduler;
pub use memory::{Call, MemoryScheduler};
pub use retry::RetryPolicy;
