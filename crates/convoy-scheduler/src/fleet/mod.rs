//! Scheduler adapter for the fleet cluster orchestrator.
//!
//! Talks to the fleet v1 HTTP API. Unit state is read once per planning
//! pass and cached; every mutating call drops the cache so the next read
//! sees the new cluster state.

pub mod client;
pub mod options;

use std::time::Duration;

use async_trait::async_trait;
use convoy_core::Cluster;
use convoy_units::UnitData;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{ChangeSet, Scheduler, StopStats, UnitState};
use crate::diff::diff_lines;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Events, Reason, UnitAction};
use crate::retry::RetryPolicy;

pub use client::{DesiredState, FleetClient, FleetMachine, FleetUnit, FleetUnitState, template_name};
pub use options::{UnitOption, is_global, parse_unit, render_options};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct FleetScheduler {
    client: FleetClient,
    instance_count: u32,
    start_timeout: Duration,
    poll_interval: Duration,
    states: Mutex<Option<Vec<FleetUnitState>>>,
}

impl FleetScheduler {
    pub fn new(cluster: &Cluster) -> SchedulerResult<Self> {
        let client = FleetClient::new(&cluster.endpoint, RetryPolicy::from(&cluster.retry))?;
        Ok(Self {
            client,
            instance_count: cluster.instance_count,
            start_timeout: cluster.start_timeout(),
            poll_interval: POLL_INTERVAL,
            states: Mutex::new(None),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn invalidate(&self) {
        *self.states.lock().await = None;
    }

    async fn cached_state(&self, unit: &str) -> SchedulerResult<Option<FleetUnitState>> {
        let mut cache = self.states.lock().await;
        if cache.is_none() {
            *cache = Some(self.client.states(None).await?);
        }
        Ok(cache
            .as_ref()
            .and_then(|states| states.iter().find(|s| s.name == unit).cloned()))
    }

    /// Fetch a unit, falling back to its template for instance units.
    async fn lookup(&self, name: &str) -> SchedulerResult<FleetUnit> {
        match self.client.unit(name).await {
            Err(e) if e.is_not_found() => match template_name(name) {
                Some(template) => {
                    debug!(unit = name, %template, "falling back to template unit");
                    self.client.unit(&template).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    /// Poll the state of `unit` until `done` holds or `timeout` elapses.
    async fn wait_for(
        &self,
        unit: &str,
        what: &str,
        timeout: Duration,
        done: impl Fn(Option<&FleetUnitState>) -> bool,
    ) -> SchedulerResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let states = self.client.states(Some(unit)).await?;
            let state = states.iter().find(|s| s.name == unit);
            if done(state) {
                return Ok(());
            }
            if state.is_some_and(FleetUnitState::is_failed) {
                return Err(SchedulerError::Rejected {
                    status: 0,
                    message: format!("{unit} failed while waiting for {what}"),
                });
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Timeout {
                    what: format!("{unit} to be {what}"),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns whether the unit is global, or `None` when it is absent.
    async fn stop_one(&self, events: &Events, reason: Reason, name: &str) -> SchedulerResult<Option<bool>> {
        let unit = match self.client.unit(name).await {
            Ok(unit) => unit,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        events.unit(name, UnitAction::Stopping(reason));
        self.client.put_unit(name, DesiredState::Loaded, None).await?;

        let global = is_global(&unit.options);
        if !global {
            self.wait_for(name, "stopped", STOP_TIMEOUT, |s| !s.is_some_and(FleetUnitState::is_active))
                .await?;
            events.unit(name, UnitAction::Stopped);
        }
        Ok(Some(global))
    }

    async fn destroy_one(&self, events: &Events, reason: Reason, name: &str) -> SchedulerResult<()> {
        events.unit(name, UnitAction::Destroying(reason));
        match self.client.put_unit(name, DesiredState::Inactive, None).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(unit = name, error = %e, "failed to stop unit before destroying it"),
        }
        match self.client.delete_unit(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(unit = name, "unit already absent"),
            Err(e) => return Err(e),
        }
        events.unit(name, UnitAction::Destroyed);
        Ok(())
    }

    async fn start_one(&self, events: &Events, unit: &UnitData) -> SchedulerResult<()> {
        let options = parse_unit(&unit.name, &unit.content)?;
        match self.client.unit(&unit.name).await {
            Ok(_) => {
                self.client
                    .put_unit(&unit.name, DesiredState::Launched, None)
                    .await?
            }
            Err(e) if e.is_not_found() => {
                events.unit(unit.name.as_str(), UnitAction::Creating);
                // Instances of a loaded template are created by fleet itself.
                let create = if self.has_template(&unit.name).await? {
                    None
                } else {
                    Some(options.as_slice())
                };
                self.client
                    .put_unit(&unit.name, DesiredState::Launched, create)
                    .await?
            }
            Err(e) => return Err(e),
        }
        events.unit(unit.name.as_str(), UnitAction::Launching);

        match Readiness::of(&unit.name, &options) {
            Readiness::Triggered => {}
            Readiness::Launched => self.wait_launched(&unit.name).await?,
            Readiness::Running => {
                self.wait_for(&unit.name, "running", self.start_timeout, |s| {
                    s.is_some_and(FleetUnitState::is_running)
                })
                .await?;
                events.unit(unit.name.as_str(), UnitAction::Running);
            }
        }
        Ok(())
    }

    async fn has_template(&self, name: &str) -> SchedulerResult<bool> {
        let Some(template) = template_name(name) else {
            return Ok(false);
        };
        match self.client.unit(&template).await {
            Ok(_) => {
                debug!(unit = name, %template, "creating instance of loaded template");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll fleet until it reports `unit` launched on a machine.
    async fn wait_launched(&self, unit: &str) -> SchedulerResult<()> {
        let deadline = Instant::now() + self.start_timeout;
        loop {
            if self.client.unit(unit).await?.current_state == "launched" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Timeout {
                    what: format!("{unit} to be launched"),
                    after: self.start_timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// What `start` waits for after launching a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Global units and timers: nothing to wait for.
    Triggered,
    /// Oneshot services exit on their own, so only the launch is awaited.
    Launched,
    Running,
}

impl Readiness {
    fn of(name: &str, options: &[UnitOption]) -> Self {
        let oneshot = options
            .iter()
            .any(|o| o.section == "Service" && o.name == "Type" && o.value == "oneshot");
        if is_global(options) || name.ends_with(".timer") {
            Self::Triggered
        } else if oneshot {
            Self::Launched
        } else {
            Self::Running
        }
    }
}

#[async_trait]
impl Scheduler for FleetScheduler {
    async fn validate_cluster(&self) -> SchedulerResult<()> {
        let machines = self.client.machines().await?;
        if machines.is_empty() {
            return Err(SchedulerError::Config(format!(
                "fleet at {} reports no machines",
                self.client.address()
            )));
        }
        if machines.len() != self.instance_count as usize {
            warn!(
                expected = self.instance_count,
                actual = machines.len(),
                "cluster machine count differs from configured instance count"
            );
        }
        Ok(())
    }

    async fn configure_cluster(&self, cluster: &Cluster) -> SchedulerResult<()> {
        // fleet needs no bootstrap; start from a fresh view of the cluster.
        self.invalidate().await;
        info!(stack = %cluster.stack, endpoint = %self.client.address(), "using fleet cluster");
        Ok(())
    }

    async fn list(&self) -> SchedulerResult<Vec<String>> {
        let units = self.client.units().await?;
        Ok(units.into_iter().map(|u| u.name).collect())
    }

    async fn get_state(&self, unit: &str) -> SchedulerResult<UnitState> {
        let state = self
            .cached_state(unit)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(unit.to_string()))?;
        Ok(UnitState {
            failed: state.is_failed(),
            description: format!("{}/{}", state.systemd_active_state, state.systemd_sub_state),
        })
    }

    async fn has_changed(&self, unit: &UnitData) -> SchedulerResult<ChangeSet> {
        let loaded = self.lookup(&unit.name).await?;
        let desired = parse_unit(&unit.name, &unit.content)?;
        let diff = diff_lines(&render_options(&loaded.options), &render_options(&desired));
        Ok(ChangeSet {
            changed: !diff.is_empty(),
            diff,
        })
    }

    async fn stop(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<StopStats> {
        self.invalidate().await;
        let results = join_all(units.iter().map(|name| self.stop_one(events, reason, name))).await;

        let mut stats = StopStats::default();
        for (name, result) in units.iter().zip(results) {
            match result {
                Ok(Some(true)) => stats.stopped_global_units += 1,
                Ok(Some(false)) => stats.stopped_units += 1,
                Ok(None) => {}
                Err(e) => warn!(unit = %name, error = %e, "failed to stop unit"),
            }
        }
        Ok(stats)
    }

    async fn destroy(&self, events: &Events, reason: Reason, units: &[String]) -> SchedulerResult<()> {
        self.invalidate().await;
        let results = join_all(units.iter().map(|name| self.destroy_one(events, reason, name))).await;
        SchedulerError::collect(results.into_iter().filter_map(Result::err).collect())
    }

    async fn start(&self, events: &Events, units: &[UnitData]) -> SchedulerResult<()> {
        self.invalidate().await;
        let results = join_all(units.iter().map(|unit| self.start_one(events, unit))).await;
        SchedulerError::collect(results.into_iter().filter_map(Result::err).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_unit_type() {
        let service = parse_unit("a@1.service", "[Service]\nExecStart=/bin/true\n").unwrap();
        let oneshot = parse_unit("a@1.service", "[Service]\nType=oneshot\nExecStart=/bin/true\n").unwrap();
        let global = parse_unit("g.service", "[Service]\nExecStart=/bin/true\n\n[X-Fleet]\nGlobal=true\n").unwrap();
        let timer = parse_unit("a-tm@1.timer", "[Timer]\nOnCalendar=daily\n").unwrap();

        assert_eq!(Readiness::of("a@1.service", &service), Readiness::Running);
        assert_eq!(Readiness::of("a@1.service", &oneshot), Readiness::Launched);
        assert_eq!(Readiness::of("g.service", &global), Readiness::Triggered);
        assert_eq!(Readiness::of("a-tm@1.timer", &timer), Readiness::Triggered);
    }
}
