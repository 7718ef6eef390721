//! In-process scheduler backend.
//!
//! Keeps the unit inventory in memory. Used to simulate rollouts locally
//! and to drive engine tests, with switches to inject backend failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use convoy_core::Cluster;
use convoy_units::UnitData;
use tracing::{debug, info};

use crate::backend::{ChangeSet, Scheduler, StopStats, UnitState};
use crate::diff::diff_lines;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Events, Reason, UnitAction};

/// A backend call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ValidateCluster,
    ConfigureCluster(String),
    List,
    GetState(String),
    HasChanged(String),
    Stop(Reason, Vec<String>),
    Destroy(Reason, Vec<String>),
    Start(Vec<String>),
}

#[derive(Debug, Clone)]
struct LoadedUnit {
    content: String,
    failed: bool,
    running: bool,
}

impl LoadedUnit {
    fn is_global(&self) -> bool {
        self.content.lines().any(|l| l.trim() == "Global=true")
    }
}

#[derive(Debug, Default)]
struct Faults {
    reject_cluster: Option<String>,
    destroy: HashSet<String>,
    start: HashSet<String>,
    state: HashMap<String, SchedulerError>,
    change_read: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    units: BTreeMap<String, LoadedUnit>,
    faults: Faults,
    calls: Vec<Call>,
}

/// Scheduler backed by an in-memory inventory.
#[derive(Debug, Default)]
pub struct MemoryScheduler {
    inner: Mutex<Inner>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a unit as running.
    pub fn insert(&self, name: impl Into<String>, content: impl Into<String>) {
        self.lock().units.insert(
            name.into(),
            LoadedUnit {
                content: content.into(),
                failed: false,
                running: true,
            },
        );
    }

    pub fn insert_data(&self, unit: &UnitData) {
        self.insert(unit.name.clone(), unit.content.clone());
    }

    pub fn mark_failed(&self, name: &str) {
        if let Some(unit) = self.lock().units.get_mut(name) {
            unit.failed = true;
            unit.running = false;
        }
    }

    /// Make `validate_cluster` fail.
    pub fn reject_cluster(&self, reason: impl Into<String>) {
        self.lock().faults.reject_cluster = Some(reason.into());
    }

    pub fn fail_destroy(&self, name: impl Into<String>) {
        self.lock().faults.destroy.insert(name.into());
    }

    pub fn fail_start(&self, name: impl Into<String>) {
        self.lock().faults.start.insert(name.into());
    }

    /// Make `get_state` for `name` return `error`.
    pub fn fail_state(&self, name: impl Into<String>, error: SchedulerError) {
        self.lock().faults.state.insert(name.into(), error);
    }

    /// Make `has_changed` for `name` fail.
    pub fn fail_change_read(&self, name: impl Into<String>) {
        self.lock().faults.change_read.insert(name.into());
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.lock().units.keys().cloned().collect()
    }

    pub fn content(&self, name: &str) -> Option<String> {
        self.lock().units.get(name).map(|u| u.content.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().units.get(name).is_some_and(|u| u.running)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Every unit passed to `destroy`, with its reason, in call order.
    pub fn destroyed(&self) -> Vec<(Reason, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Destroy(reason, units) => Some(units.iter().map(|u| (*reason, u.clone()))),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Every unit passed to `start`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Start(units) => Some(units.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn validate_cluster(&self) -> SchedulerResult<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::ValidateCluster);
        match &inner.faults.reject_cluster {
            Some(reason) => Err(SchedulerError::Config(reason.clone())),
            None => Ok(()),
        }
    }

    async fn configure_cluster(&self, cluster: &Cluster) -> SchedulerResult<()> {
        self.record(Call::ConfigureCluster(cluster.stack.clone()));
        Ok(())
    }

    async fn list(&self) -> SchedulerResult<Vec<String>> {
        let mut inner = self.lock();
        inner.calls.push(Call::List);
        Ok(inner.units.keys().cloned().collect())
    }

    async fn get_state(&self, unit: &str) -> SchedulerResult<UnitState> {
        let mut inner = self.lock();
        inner.calls.push(Call::GetState(unit.to_string()));
        if let Some(err) = inner.faults.state.get(unit) {
            return Err(err.clone());
        }
        let loaded = inner
            .units
            .get(unit)
            .ok_or_else(|| SchedulerError::NotFound(unit.to_string()))?;
        let description = match (loaded.failed, loaded.running) {
            (true, _) => "failed",
            (false, true) => "active/running",
            (false, false) => "inactive/dead",
        };
        Ok(UnitState {
            failed: loaded.failed,
            description: description.to_string(),
        })
    }

    async fn has_changed(&self, unit: &UnitData) -> SchedulerResult<ChangeSet> {
        let mut inner = self.lock();
        inner.calls.push(Call::HasChanged(unit.name.clone()));
        if inner.faults.change_read.contains(&unit.name) {
            return Err(SchedulerError::Transient(format!(
                "cannot read {}",
                unit.name
            )));
        }
        let loaded = inner
            .units
            .get(&unit.name)
            .ok_or_else(|| SchedulerError::NotFound(unit.name.clone()))?;
        let diff = diff_lines(&loaded.content, &unit.content);
        Ok(ChangeSet {
            changed: !diff.is_empty(),
            diff,
        })
    }

    async fn stop(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<StopStats> {
        let mut inner = self.lock();
        inner.calls.push(Call::Stop(reason, units.to_vec()));
        let mut stats = StopStats::default();
        for name in units {
            let Some(unit) = inner.units.get_mut(name) else {
                continue;
            };
            events.unit(name.as_str(), UnitAction::Stopping(reason));
            unit.running = false;
            if unit.is_global() {
                stats.stopped_global_units += 1;
            } else {
                stats.stopped_units += 1;
                events.unit(name.as_str(), UnitAction::Stopped);
            }
        }
        Ok(stats)
    }

    async fn destroy(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Destroy(reason, units.to_vec()));
        let mut errors = Vec::new();
        for name in units {
            events.unit(name.as_str(), UnitAction::Destroying(reason));
            if inner.faults.destroy.contains(name) {
                errors.push(SchedulerError::Rejected {
                    status: 500,
                    message: format!("cannot destroy {name}"),
                });
                continue;
            }
            if inner.units.remove(name).is_some() {
                debug!(unit = %name, %reason, "destroyed unit");
            }
            events.unit(name.as_str(), UnitAction::Destroyed);
        }
        SchedulerError::collect(errors)
    }

    async fn start(&self, events: &Events, units: &[UnitData]) -> SchedulerResult<()> {
        let mut inner = self.lock();
        inner
            .calls
            .push(Call::Start(units.iter().map(|u| u.name.clone()).collect()));
        let mut errors = Vec::new();
        for unit in units {
            if inner.faults.start.contains(&unit.name) {
                errors.push(SchedulerError::Rejected {
                    status: 500,
                    message: format!("cannot start {}", unit.name),
                });
                continue;
            }
            if !inner.units.contains_key(&unit.name) {
                events.unit(unit.name.as_str(), UnitAction::Creating);
            }
            inner.units.insert(
                unit.name.clone(),
                LoadedUnit {
                    content: unit.content.clone(),
                    failed: false,
                    running: true,
                },
            );
            events.unit(unit.name.as_str(), UnitAction::Launching);
            events.unit(unit.name.as_str(), UnitAction::Running);
        }
        info!(units = units.len(), "started units");
        SchedulerError::collect(errors)
    }
}
