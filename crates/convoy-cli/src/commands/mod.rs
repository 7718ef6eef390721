use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use convoy_core::{Cluster, GroupName, Job};
use convoy_rollout::{Interrupt, RolloutOptions, Waiter};
use convoy_units::GroupSelection;
use tokio::task::JoinHandle;
use tracing::info;

pub mod destroy;
pub mod generate;
pub mod run;

/// Job and cluster to operate on.
#[derive(clap::Args)]
pub struct Target {
    /// Job model (TOML).
    #[arg(short, long)]
    pub job: PathBuf,
    /// Cluster model (TOML).
    #[arg(short, long)]
    pub cluster: PathBuf,
    /// Only these task groups. Repeatable.
    #[arg(short, long = "group")]
    pub groups: Vec<String>,
    /// Only this scaling group.
    #[arg(short, long)]
    pub scaling_group: Option<u32>,
}

impl Target {
    pub fn load(&self) -> anyhow::Result<(Job, Cluster)> {
        let job = Job::from_file(&self.job)
            .with_context(|| format!("loading job {}", self.job.display()))?;
        let cluster = Cluster::from_file(&self.cluster)
            .with_context(|| format!("loading cluster {}", self.cluster.display()))?;
        Ok((job, cluster))
    }

    pub fn selection(&self, job: &Job) -> anyhow::Result<GroupSelection> {
        let mut groups = Vec::with_capacity(self.groups.len());
        for name in &self.groups {
            let group: GroupName = name.parse()?;
            if job.group(name).is_none() {
                anyhow::bail!("job {} has no group {name}", job.name);
            }
            groups.push(group);
        }
        Ok(GroupSelection::only(groups))
    }
}

/// Pacing and confirmation flags of `run`.
#[derive(clap::Args)]
pub struct RolloutArgs {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
    /// Seconds between destroying and starting units of a scaling group.
    #[arg(long, default_value = "15")]
    pub destroy_delay: u64,
    /// Seconds between scaling groups.
    #[arg(long, default_value = "15")]
    pub slice_delay: u64,
    /// Seconds within which a second ctrl-c aborts the run.
    #[arg(long, default_value = "3")]
    pub interrupt_window: u64,
}

impl RolloutArgs {
    pub fn options(&self, target: &Target, job: &Job, force: bool) -> anyhow::Result<RolloutOptions> {
        Ok(RolloutOptions {
            force,
            auto_confirm: self.yes,
            groups: target.selection(job)?,
            scaling_group: target.scaling_group,
            destroy_delay: Duration::from_secs(self.destroy_delay),
            slice_delay: Duration::from_secs(self.slice_delay),
        })
    }
}

/// Forward ctrl-c to the waiter until the run is aborted.
pub fn watch_interrupts(waiter: Arc<Waiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if waiter.interrupt() == Interrupt::Aborted {
                info!("run aborted, finishing in-flight operations");
                break;
            }
        }
    })
}
