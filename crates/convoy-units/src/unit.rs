//! Units and unit chains.
//!
//! A [`Unit`] is one deployable artifact. A [`UnitChain`] is the ordered
//! list of units built for one task: proxy sidecars, volume sidecars, then
//! the main unit. Timer units travel in a chain of their own.

use std::collections::{BTreeMap, BTreeSet};

use convoy_core::{TaskName, TaskScope};
use serde::Serialize;

/// File type of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Service,
    Timer,
}

impl UnitKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Timer => "timer",
        }
    }
}

/// Position of a unit within its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    /// TCP link forwarder, indexed per task.
    Proxy(usize),
    /// Instance volume provisioner, indexed per task.
    Volume(usize),
    Main,
    Timer,
}

impl UnitRole {
    /// Kind segment of the unit name.
    pub fn suffix(self) -> String {
        match self {
            Self::Proxy(i) => format!("pr{i}"),
            Self::Volume(i) => format!("vl{i}"),
            Self::Main => "mn".to_string(),
            Self::Timer => "tm".to_string(),
        }
    }

    pub fn kind(self) -> UnitKind {
        match self {
            Self::Timer => UnitKind::Timer,
            _ => UnitKind::Service,
        }
    }
}

/// Name factory for the units of one task in one scaling group.
///
/// Names look like `<job>-<group>-<task>-<kind>[@<sg>].<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitNaming {
    base: String,
    scaling_group: Option<u32>,
}

impl UnitNaming {
    pub fn new(scope: &TaskScope<'_>, scaling_group: u32) -> Self {
        Self::from_base(scope.unit_base(), scope.group.is_scalable().then_some(scaling_group))
    }

    pub fn from_base(base: String, scaling_group: Option<u32>) -> Self {
        Self {
            base,
            scaling_group,
        }
    }

    /// Name without instance suffix or extension.
    pub fn name(&self, role: UnitRole) -> String {
        format!("{}-{}", self.base, role.suffix())
    }

    pub fn full_name(&self, role: UnitRole) -> String {
        let ext = role.kind().extension();
        match self.scaling_group {
            Some(sg) => format!("{}@{sg}.{ext}", self.name(role)),
            None => format!("{}.{ext}", self.name(role)),
        }
    }

    /// Docker container name; `@` is not allowed there.
    pub fn container_name(&self, role: UnitRole) -> String {
        match self.scaling_group {
            Some(sg) => format!("{}-{sg}", self.name(role)),
            None => self.name(role),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn scaling_group(&self) -> Option<u32> {
        self.scaling_group
    }
}

/// Whether a loaded unit name belongs to scaling group `sg`.
///
/// Suffixed names match on `@<sg>.`; unsuffixed names belong to group 1.
pub fn in_scaling_group(unit_name: &str, sg: u32) -> bool {
    if unit_name.contains('@') {
        unit_name.contains(&format!("@{sg}."))
    } else {
        sg == 1
    }
}

/// One deployable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    pub name: String,
    pub full_name: String,
    pub role: UnitRole,
    pub kind: UnitKind,
    pub description: String,

    pub start_pre: Vec<String>,
    /// argv of the main process.
    pub start: Vec<String>,
    pub start_post: Vec<String>,
    pub stop_pre: Vec<String>,
    pub stop: Vec<String>,
    pub stop_post: Vec<String>,

    pub environment: BTreeMap<String, String>,
    pub environment_files: Vec<String>,

    pub after: BTreeSet<String>,
    pub requires: BTreeSet<String>,
    pub part_of: BTreeSet<String>,

    pub global: bool,
    pub machine_metadata: BTreeSet<String>,
    pub conflicts: BTreeSet<String>,
    pub machine_of: Option<String>,
    pub machine_id: Option<String>,

    /// Backend specific settings for the `[Service]` or `[Timer]` section.
    pub settings: BTreeMap<String, String>,
}

impl Unit {
    pub fn new(naming: &UnitNaming, role: UnitRole, description: impl Into<String>) -> Self {
        Self {
            name: naming.name(role),
            full_name: naming.full_name(role),
            role,
            kind: role.kind(),
            description: description.into(),
            start_pre: Vec::new(),
            start: Vec::new(),
            start_post: Vec::new(),
            stop_pre: Vec::new(),
            stop: Vec::new(),
            stop_post: Vec::new(),
            environment: BTreeMap::new(),
            environment_files: Vec::new(),
            after: BTreeSet::new(),
            requires: BTreeSet::new(),
            part_of: BTreeSet::new(),
            global: false,
            machine_metadata: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            machine_of: None,
            machine_id: None,
            settings: BTreeMap::new(),
        }
    }

    /// Add a dependency that must be started before this unit.
    pub fn depends_on(&mut self, full_name: impl Into<String>) {
        let full_name = full_name.into();
        self.requires.insert(full_name.clone());
        self.after.insert(full_name);
    }
}

/// Ordered units of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitChain {
    task: TaskName,
    units: Vec<Unit>,
}

impl UnitChain {
    pub fn new(task: TaskName, units: Vec<Unit>) -> Self {
        Self { task, units }
    }

    /// Task the units were built for.
    pub fn task(&self) -> &TaskName {
        &self.task
    }

    /// Tie consecutive units together.
    ///
    /// Unit `i` requires unit `i + 1`; unit `i + 1` requires and starts
    /// after unit `i`.
    pub fn link(&mut self) {
        for i in 1..self.units.len() {
            let prev = self.units[i - 1].full_name.clone();
            let next = self.units[i].full_name.clone();
            self.units[i - 1].requires.insert(next);
            self.units[i].depends_on(prev);
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [Unit] {
        &mut self.units
    }

    pub fn into_units(self) -> Vec<Unit> {
        self.units
    }

    pub fn main(&self) -> Option<&Unit> {
        self.units.iter().find(|u| u.role == UnitRole::Main)
    }

    pub fn main_mut(&mut self) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.role == UnitRole::Main)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
