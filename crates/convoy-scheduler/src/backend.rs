//! The scheduler backend contract.

use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::{Cluster, Orchestrator};
use convoy_units::UnitData;

use crate::error::SchedulerResult;
use crate::events::{Events, Reason};
use crate::fleet::FleetScheduler;

/// Runtime state of a loaded unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub failed: bool,
    /// Backend specific state description, e.g. `active/running`.
    pub description: String,
}

/// Result of comparing desired content with the loaded unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// `-`/`+` prefixed lines.
    pub diff: Vec<String>,
    pub changed: bool,
}

/// Outcome of a best-effort stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopStats {
    pub stopped_units: usize,
    /// Global units whose stop was requested but not awaited.
    pub stopped_global_units: usize,
}

/// Operations a cluster orchestrator adapter provides.
///
/// Remote implementations retry transient failures internally. `NotFound`
/// is returned as-is and never retried.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Pre-flight check that the cluster is reachable and usable.
    async fn validate_cluster(&self) -> SchedulerResult<()>;

    /// One-off cluster bootstrap before a run.
    async fn configure_cluster(&self, cluster: &Cluster) -> SchedulerResult<()>;

    /// Names of every unit known to the cluster.
    async fn list(&self) -> SchedulerResult<Vec<String>>;

    async fn get_state(&self, unit: &str) -> SchedulerResult<UnitState>;

    async fn has_changed(&self, unit: &UnitData) -> SchedulerResult<ChangeSet>;

    /// Best-effort stop. Global units are triggered, not awaited.
    async fn stop(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<StopStats>;

    /// Remove units. Absent units are not an error.
    async fn destroy(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<()>;

    /// Create missing units, launch all, and wait for non-global units to
    /// run.
    async fn start(&self, events: &Events, units: &[UnitData]) -> SchedulerResult<()>;
}

/// Build the scheduler selected by the cluster configuration.
pub fn connect(cluster: &Cluster) -> SchedulerResult<Arc<dyn Scheduler>> {
    match cluster.orchestrator {
        Orchestrator::Fleet => Ok(Arc::new(FleetScheduler::new(cluster)?)),
    }
}
