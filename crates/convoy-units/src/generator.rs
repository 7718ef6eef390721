//! Job level generation: every selected group for one scaling group.

use convoy_core::{GroupName, Job, TaskGroup};

use crate::builder::build_group;
use crate::context::GeneratorContext;
use crate::error::BuildResult;
use crate::render::{Renderer, UnitData};
use crate::unit::Unit;

/// Task groups to operate on. Empty means all groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSelection {
    groups: Vec<GroupName>,
}

impl GroupSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(groups: Vec<GroupName>) -> Self {
        Self { groups }
    }

    pub fn is_all(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn includes(&self, group: &GroupName) -> bool {
        self.is_all() || self.groups.contains(group)
    }

    /// Whether a loaded unit belongs to a selected group of `job`.
    pub fn matches_unit(&self, job: &Job, unit_name: &str) -> bool {
        let Some(rest) = unit_name.strip_prefix(&format!("{}-", job.name)) else {
            return false;
        };
        self.is_all()
            || self
                .groups
                .iter()
                .any(|g| rest.starts_with(&format!("{g}-")))
    }

    pub fn groups<'a>(&'a self, job: &'a Job) -> impl Iterator<Item = &'a TaskGroup> {
        job.groups.iter().filter(|g| self.includes(&g.name))
    }
}

/// Units of all selected groups for the context's scaling group, in build
/// order.
pub fn generate_units(
    job: &Job,
    ctx: &GeneratorContext<'_>,
    selection: &GroupSelection,
) -> BuildResult<Vec<Unit>> {
    let mut units = Vec::new();
    for group in selection.groups(job) {
        for chain in build_group(job, group, ctx)? {
            units.extend(chain.into_units());
        }
    }
    Ok(units)
}

/// Rendered units of all selected groups for the context's scaling group.
pub fn generate(
    job: &Job,
    ctx: &GeneratorContext<'_>,
    selection: &GroupSelection,
    renderer: &dyn Renderer,
) -> BuildResult<Vec<UnitData>> {
    let units = generate_units(job, ctx, selection)?;
    Ok(units.iter().map(|u| renderer.render(u)).collect())
}
