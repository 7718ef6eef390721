//! Classification of loaded units against the desired units of a slice.

use std::collections::BTreeSet;

use convoy_core::Job;
use convoy_scheduler::{Scheduler, SchedulerError};
use convoy_units::{GroupSelection, UnitData, in_scaling_group};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::summary::{ChangeAction, ChangeSummary};

/// Loaded units owned by `job` within the selected groups and scaling
/// group.
pub fn job_units(
    inventory: &[String],
    job: &Job,
    groups: &GroupSelection,
    scaling_group: Option<u32>,
) -> BTreeSet<String> {
    inventory
        .iter()
        .filter(|name| groups.matches_unit(job, name))
        .filter(|name| scaling_group.is_none_or(|sg| in_scaling_group(name, sg)))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Untouched,
    Modified(String),
    Failed(String),
}

/// Changes needed to converge one scaling group.
#[derive(Debug, Clone, Default)]
pub struct SlicePlan {
    pub scaling_group: u32,
    pub desired: Vec<UnitData>,
    pub obsolete: Vec<String>,
    pub modified: Vec<String>,
    pub failed: Vec<String>,
    pub new: Vec<String>,
    pub summary: ChangeSummary,
}

impl SlicePlan {
    /// Plan a slice. `remaining` holds loaded units not yet handled by an
    /// earlier slice; only those in `scaling_group` are considered.
    pub async fn build(
        scheduler: &dyn Scheduler,
        scaling_group: u32,
        desired: Vec<UnitData>,
        remaining: &BTreeSet<String>,
        force: bool,
    ) -> Self {
        let desired_names: BTreeSet<&str> = desired.iter().map(|u| u.name.as_str()).collect();
        let loaded: Vec<&String> = remaining
            .iter()
            .filter(|name| in_scaling_group(name, scaling_group))
            .collect();

        let mut plan = SlicePlan {
            scaling_group,
            summary: ChangeSummary::new(Some(scaling_group)),
            ..SlicePlan::default()
        };

        let mut candidates = Vec::new();
        for name in &loaded {
            if desired_names.contains(name.as_str()) {
                candidates.push(name.as_str());
            } else {
                plan.obsolete.push((*name).clone());
                plan.summary.push(name.as_str(), ChangeAction::Obsolete, "");
            }
        }

        let verdicts = join_all(
            candidates
                .iter()
                .map(|name| classify(scheduler, &desired, name, force)),
        )
        .await;
        for (name, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                Verdict::Untouched => {}
                Verdict::Modified(extra) => {
                    plan.modified.push(name.to_string());
                    plan.summary.push(name, ChangeAction::Modified, extra);
                }
                Verdict::Failed(extra) => {
                    plan.failed.push(name.to_string());
                    plan.summary.push(name, ChangeAction::Failed, extra);
                }
            }
        }

        for unit in &desired {
            if !loaded.iter().any(|name| **name == unit.name) {
                plan.new.push(unit.name.clone());
                plan.summary.push(unit.name.as_str(), ChangeAction::New, "");
            }
        }

        debug!(
            scaling_group,
            obsolete = plan.obsolete.len(),
            modified = plan.modified.len(),
            failed = plan.failed.len(),
            new = plan.new.len(),
            "planned slice"
        );
        plan.desired = desired;
        plan
    }

    pub fn has_changes(&self) -> bool {
        !self.summary.is_empty()
    }

    /// Whether any unit will be destroyed.
    pub fn destroys(&self) -> bool {
        !(self.obsolete.is_empty() && self.modified.is_empty() && self.failed.is_empty())
    }

    /// Desired units to start: modified, failed and new, in build order.
    pub fn to_start(&self) -> Vec<UnitData> {
        self.desired
            .iter()
            .filter(|u| {
                self.modified.contains(&u.name)
                    || self.failed.contains(&u.name)
                    || self.new.contains(&u.name)
            })
            .cloned()
            .collect()
    }
}

async fn classify(scheduler: &dyn Scheduler, desired: &[UnitData], name: &str, force: bool) -> Verdict {
    if force {
        return Verdict::Modified("forced".to_string());
    }
    let Some(unit) = desired.iter().find(|u| u.name == name) else {
        return Verdict::Untouched;
    };

    match scheduler.has_changed(unit).await {
        Ok(changes) if changes.changed => {
            return Verdict::Modified(format!("{} lines changed", changes.diff.len()));
        }
        Ok(_) => {}
        Err(e) => {
            warn!(unit = name, error = %e, "cannot read unit, replacing it");
            return Verdict::Modified("unreadable".to_string());
        }
    }

    match scheduler.get_state(name).await {
        Ok(state) if state.failed => Verdict::Failed(state.description),
        Ok(_) => Verdict::Untouched,
        Err(SchedulerError::NotFound(_)) => Verdict::Failed("state missing".to_string()),
        Err(e) => {
            warn!(unit = name, error = %e, "cannot read unit state, leaving it");
            Verdict::Untouched
        }
    }
}

#[cfg(test)]
mod tests {
    use convoy_scheduler::MemoryScheduler;

    use super::*;

    fn job() -> Job {
        Job::from_toml(
            r#"
name = "app"

[[groups]]
name = "web"
count = 2

[[groups.tasks]]
name = "srv"
image = "nginx:1.25"
"#,
        )
        .unwrap()
    }

    #[test]
    fn job_units_filters_by_job_group_and_scaling_group() {
        let inventory: Vec<String> = [
            "app-web-srv-mn@1.service",
            "app-web-srv-mn@2.service",
            "app-db-main-mn.service",
            "apple-web-srv-mn@1.service",
            "other-web-srv-mn@1.service",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let job = job();

        let all = job_units(&inventory, &job, &GroupSelection::all(), None);
        assert_eq!(all.len(), 3);

        let web = GroupSelection::only(vec!["web".parse().unwrap()]);
        let sg1 = job_units(&inventory, &job, &web, Some(1));
        assert_eq!(
            sg1.into_iter().collect::<Vec<_>>(),
            vec!["app-web-srv-mn@1.service"]
        );

        let unsuffixed = job_units(&inventory, &job, &GroupSelection::all(), Some(1));
        assert!(unsuffixed.contains("app-db-main-mn.service"));
    }

    #[tokio::test]
    async fn classifies_every_category() {
        let scheduler = MemoryScheduler::new();
        let same = UnitData::new("a@1.service", "[Unit]\nDescription=a\n");
        let changed = UnitData::new("b@1.service", "[Unit]\nDescription=b2\n");
        let broken = UnitData::new("c@1.service", "[Unit]\nDescription=c\n");
        let fresh = UnitData::new("d@1.service", "[Unit]\nDescription=d\n");
        scheduler.insert_data(&same);
        scheduler.insert("b@1.service", "[Unit]\nDescription=b\n");
        scheduler.insert_data(&broken);
        scheduler.mark_failed("c@1.service");
        scheduler.insert("x@1.service", "[Unit]\n");

        let remaining: BTreeSet<String> = scheduler.unit_names().into_iter().collect();
        let desired = vec![same, changed, broken, fresh];
        let plan = SlicePlan::build(&scheduler, 1, desired, &remaining, false).await;

        assert_eq!(plan.obsolete, vec!["x@1.service"]);
        assert_eq!(plan.modified, vec!["b@1.service"]);
        assert_eq!(plan.failed, vec!["c@1.service"]);
        assert_eq!(plan.new, vec!["d@1.service"]);
        let start: Vec<String> = plan.to_start().into_iter().map(|u| u.name).collect();
        assert_eq!(start, vec!["b@1.service", "c@1.service", "d@1.service"]);
    }

    #[tokio::test]
    async fn state_read_errors() {
        let scheduler = MemoryScheduler::new();
        let a = UnitData::new("a@1.service", "a");
        let b = UnitData::new("b@1.service", "b");
        scheduler.insert_data(&a);
        scheduler.insert_data(&b);
        scheduler.fail_state("a@1.service", SchedulerError::NotFound("a@1.service".into()));
        scheduler.fail_state("b@1.service", SchedulerError::Transient("reset".into()));

        let remaining: BTreeSet<String> = scheduler.unit_names().into_iter().collect();
        let plan = SlicePlan::build(&scheduler, 1, vec![a, b], &remaining, false).await;

        assert_eq!(plan.failed, vec!["a@1.service"]);
        assert!(plan.modified.is_empty());
        assert_eq!(plan.summary.len(), 1);
    }

    #[tokio::test]
    async fn ignores_units_of_other_scaling_groups() {
        let scheduler = MemoryScheduler::new();
        scheduler.insert("a@2.service", "a");
        let remaining: BTreeSet<String> = scheduler.unit_names().into_iter().collect();

        let plan = SlicePlan::build(&scheduler, 1, vec![], &remaining, false).await;
        assert!(!plan.has_changes());
    }
}
