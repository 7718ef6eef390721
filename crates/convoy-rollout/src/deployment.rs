//! Deployment driver: converges the cluster to a job one scaling group at
//! a time.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use convoy_core::{Cluster, Job};
use convoy_scheduler::{Events, Reason, Scheduler};
use convoy_units::{GeneratorContext, Renderer, SystemdRenderer, generate, in_scaling_group};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::confirm::{AutoConfirm, Confirmation, Confirmer};
use crate::error::{RolloutError, RolloutResult};
use crate::options::RolloutOptions;
use crate::phase::RolloutPhase;
use crate::plan::{SlicePlan, job_units};
use crate::summary::{ChangeAction, ChangeSummary};
use crate::wait::Waiter;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The cluster already matched the job.
    NoChanges,
    Done,
    /// The operator declined a confirmation.
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoChanges => "no modifications needed",
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

pub struct Deployment {
    job: Job,
    cluster: Cluster,
    scheduler: Arc<dyn Scheduler>,
    renderer: Box<dyn Renderer>,
    confirmer: Arc<dyn Confirmer>,
    waiter: Arc<Waiter>,
    events: Events,
    options: RolloutOptions,
    phase: RolloutPhase,
    /// Set once the operator answers "all".
    confirm_all: bool,
}

impl Deployment {
    pub fn new(job: Job, cluster: Cluster, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            job,
            cluster,
            scheduler,
            renderer: Box::new(SystemdRenderer),
            confirmer: Arc::new(AutoConfirm::default()),
            waiter: Arc::new(Waiter::default()),
            events: Events::discard(),
            options: RolloutOptions::default(),
            phase: RolloutPhase::Planning,
            confirm_all: false,
        }
    }

    pub fn with_options(mut self, options: RolloutOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn with_waiter(mut self, waiter: Arc<Waiter>) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    fn enter(&mut self, phase: RolloutPhase, scaling_group: Option<u32>) {
        debug!(job = %self.job.name, ?scaling_group, %phase, "entering phase");
        self.phase = phase;
    }

    /// Converge the cluster to the job.
    pub async fn run(&mut self) -> RolloutResult<Outcome> {
        self.confirm_all = self.options.skips_confirmation();
        self.enter(RolloutPhase::Planning, None);

        let inventory = self.inventory().await?;
        let mut remaining = job_units(
            &inventory,
            &self.job,
            &self.options.groups,
            self.options.scaling_group,
        );
        info!(
            job = %self.job.name,
            loaded = remaining.len(),
            scaling_groups = self.job.max_count(),
            "starting deployment"
        );

        let mut changed = false;
        for sg in 1..=self.job.max_count() {
            if !self.options.includes_scaling_group(sg) {
                continue;
            }
            self.waiter.check()?;
            match self.run_slice(sg, &remaining, changed).await? {
                SliceOutcome::Unchanged => {}
                SliceOutcome::Applied => changed = true,
                SliceOutcome::Declined => return Ok(Outcome::Aborted),
            }
            remaining.retain(|name| !in_scaling_group(name, sg));
        }

        if !remaining.is_empty() {
            self.waiter.check()?;
            let orphans: Vec<String> = remaining.into_iter().collect();
            let mut summary = ChangeSummary::new(None);
            for unit in &orphans {
                summary.push(unit.as_str(), ChangeAction::Obsolete, "");
            }
            self.events
                .message(format!("{} obsolete units left after all scaling groups", orphans.len()));
            if !self.confirm(&summary).await {
                return Ok(Outcome::Aborted);
            }
            self.enter(RolloutPhase::Destroying, None);
            self.scheduler
                .destroy(&self.events, Reason::Obsolete, &orphans)
                .await
                .map_err(RolloutError::scheduler(RolloutPhase::Destroying))?;
            changed = true;
        }

        self.enter(RolloutPhase::Done, None);
        let outcome = if changed {
            Outcome::Done
        } else {
            Outcome::NoChanges
        };
        info!(job = %self.job.name, %outcome, "deployment finished");
        self.events.message(outcome.to_string());
        Ok(outcome)
    }

    async fn run_slice(
        &mut self,
        sg: u32,
        remaining: &BTreeSet<String>,
        after_change: bool,
    ) -> RolloutResult<SliceOutcome> {
        self.enter(RolloutPhase::Planning, Some(sg));
        let ctx = GeneratorContext::new(&self.cluster, sg);
        let desired = generate(&self.job, &ctx, &self.options.groups, self.renderer.as_ref())
            .map_err(|source| RolloutError::Build {
                scaling_group: sg,
                source,
            })?;
        let plan = SlicePlan::build(
            self.scheduler.as_ref(),
            sg,
            desired,
            remaining,
            self.options.force,
        )
        .await;

        if !plan.has_changes() {
            debug!(job = %self.job.name, scaling_group = sg, "scaling group up to date");
            self.enter(RolloutPhase::Done, Some(sg));
            return Ok(SliceOutcome::Unchanged);
        }

        if after_change {
            self.enter(RolloutPhase::Waiting, Some(sg));
            self.events.message(format!(
                "waiting {}s before scaling group {sg}",
                self.options.slice_delay.as_secs()
            ));
            self.waiter.sleep(self.options.slice_delay).await?;
        }

        self.events.message(format!(
            "scaling group {sg}: {} changes",
            plan.summary.len()
        ));
        if !self.confirm(&plan.summary).await {
            return Ok(SliceOutcome::Declined);
        }

        if plan.destroys() {
            self.enter(RolloutPhase::Destroying, Some(sg));
            self.destroy_slice(&plan).await?;
        }

        let start = plan.to_start();
        if start.is_empty() {
            self.enter(RolloutPhase::Done, Some(sg));
            return Ok(SliceOutcome::Applied);
        }
        if plan.destroys() {
            self.enter(RolloutPhase::Waiting, Some(sg));
            self.events.message(format!(
                "waiting {}s before starting units of scaling group {sg}",
                self.options.destroy_delay.as_secs()
            ));
            self.waiter.sleep(self.options.destroy_delay).await?;
        }

        self.enter(RolloutPhase::Starting, Some(sg));
        info!(job = %self.job.name, scaling_group = sg, units = start.len(), "starting units");
        self.scheduler
            .start(&self.events, &start)
            .await
            .map_err(RolloutError::scheduler(RolloutPhase::Starting))?;

        self.enter(RolloutPhase::Done, Some(sg));
        Ok(SliceOutcome::Applied)
    }

    /// Destroy the obsolete, modified and failed sets concurrently. Every
    /// set runs to completion before errors are reported.
    async fn destroy_slice(&self, plan: &SlicePlan) -> RolloutResult<()> {
        let sets = [
            (Reason::Obsolete, &plan.obsolete),
            (Reason::Modified, &plan.modified),
            (Reason::Failed, &plan.failed),
        ];
        let results = join_all(
            sets.iter()
                .filter(|(_, units)| !units.is_empty())
                .map(|(reason, units)| self.scheduler.destroy(&self.events, *reason, units.as_slice())),
        )
        .await;

        let errors: Vec<RolloutError> = results
            .into_iter()
            .filter_map(Result::err)
            .map(RolloutError::scheduler(RolloutPhase::Destroying))
            .collect();
        RolloutError::collect(errors)
    }

    /// Remove every unit of the selected groups. No scaling group phasing.
    pub async fn destroy(&mut self) -> RolloutResult<Outcome> {
        self.confirm_all = self.options.skips_confirmation();
        self.enter(RolloutPhase::Planning, None);

        let inventory = self.inventory().await?;
        let units: Vec<String> = job_units(
            &inventory,
            &self.job,
            &self.options.groups,
            self.options.scaling_group,
        )
        .into_iter()
        .collect();
        if units.is_empty() {
            self.events.message(Outcome::NoChanges.to_string());
            return Ok(Outcome::NoChanges);
        }

        let mut summary = ChangeSummary::new(self.options.scaling_group);
        for unit in &units {
            summary.push(unit.as_str(), ChangeAction::Destroy, "");
        }
        if !self.confirm(&summary).await {
            return Ok(Outcome::Aborted);
        }

        self.enter(RolloutPhase::Destroying, None);
        match self.scheduler.stop(&self.events, Reason::Teardown, &units).await {
            Ok(stats) => debug!(
                stopped = stats.stopped_units,
                stopped_global = stats.stopped_global_units,
                "stopped units before teardown"
            ),
            Err(e) => warn!(job = %self.job.name, error = %e, "stopping units failed, destroying anyway"),
        }
        self.scheduler
            .destroy(&self.events, Reason::Teardown, &units)
            .await
            .map_err(RolloutError::scheduler(RolloutPhase::Destroying))?;

        self.enter(RolloutPhase::Done, None);
        info!(job = %self.job.name, units = units.len(), "job destroyed");
        self.events.message(Outcome::Done.to_string());
        Ok(Outcome::Done)
    }

    async fn inventory(&self) -> RolloutResult<Vec<String>> {
        self.scheduler
            .validate_cluster()
            .await
            .map_err(RolloutError::scheduler(RolloutPhase::Planning))?;
        self.scheduler
            .configure_cluster(&self.cluster)
            .await
            .map_err(RolloutError::scheduler(RolloutPhase::Planning))?;
        self.scheduler
            .list()
            .await
            .map_err(RolloutError::scheduler(RolloutPhase::Planning))
    }

    /// Ask the operator unless confirmation is skipped. Returns false when
    /// declined.
    async fn confirm(&mut self, summary: &ChangeSummary) -> bool {
        if self.confirm_all {
            return true;
        }
        self.enter(RolloutPhase::AwaitingConfirmation, summary.scaling_group);
        match self.confirmer.confirm(summary).await {
            Confirmation::Yes => true,
            Confirmation::All => {
                self.confirm_all = true;
                true
            }
            Confirmation::No => {
                info!(job = %self.job.name, "changes declined by operator");
                self.events.message("aborted by operator");
                false
            }
        }
    }
}

enum SliceOutcome {
    Unchanged,
    Applied,
    Declined,
}
